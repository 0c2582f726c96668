//! Database schema text handed to agents as `{context}`.

use std::fs;
use std::path::Path;

use crate::error::BenchError;

/// Built-in description of the UPI transaction warehouse.
pub const SCHEMA_CONTEXT: &str = "\
Database: upi_prod
Table: upi_prod.upi_txn (partitioned by asdt, VARCHAR 'YYYY-MM-DD')
Columns:
- asdt VARCHAR: settlement date
- txnamount BIGINT: amount in paise
- currstatusdesc VARCHAR: SUCCESS, FAILURE, DEEMED, PARTIAL
- initmode VARCHAR: initiation mode code
- purposecode VARCHAR: purpose code
- pycode VARCHAR: payee merchant category code
- prcode VARCHAR: payer merchant category code
- prfvaddr VARCHAR: payer virtual payment address
- pyfvaddr VARCHAR: payee virtual payment address
- prdmobile VARCHAR: payer mobile number
- praccno VARCHAR: payer account number
- payeracctype VARCHAR: SAVINGS, CURRENT, CREDIT, NRE, NRO, CREDITLINE...
- prifsccode VARCHAR: payer IFSC
- pyifsccode VARCHAR: payee IFSC
- errorcode VARCHAR: error code
- finalrespcode VARCHAR: final response code
- nfsparticipantid VARCHAR: participant bank id

Table: upi_masters.upi_mcc_master
Columns: mcc_code VARCHAR, mcc_description VARCHAR, category VARCHAR

Table: upi_masters.upi_new_errorcode_respcd_master
Columns: errorcode VARCHAR, respcd VARCHAR, description VARCHAR, approvedflag VARCHAR ('TD', 'BD', 'A')

Table: upi_masters.ifsc_lgpincode_master
Columns: ifsc VARCHAR, bank_name VARCHAR, state VARCHAR, district VARCHAR, pincode VARCHAR

Table: upi_masters.urcs_bank_master
Columns: nfsparticipantid VARCHAR, bank_name VARCHAR, bank_type VARCHAR

Relationships:
- upi_txn.pycode / upi_txn.prcode = upi_mcc_master.mcc_code
- upi_txn.errorcode / upi_txn.finalrespcode = upi_new_errorcode_respcd_master.respcd
- upi_txn.prifsccode / upi_txn.pyifsccode = ifsc_lgpincode_master.ifsc
- upi_txn.nfsparticipantid = urcs_bank_master.nfsparticipantid";

/// The built-in schema, or the contents of `path` when one is given.
pub fn load_schema_context(path: Option<&Path>) -> Result<String, BenchError> {
    match path {
        None => Ok(SCHEMA_CONTEXT.to_string()),
        Some(path) => fs::read_to_string(path).map_err(|e| {
            BenchError::Config(format!("cannot read schema context {}: {e}", path.display()))
        }),
    }
}
