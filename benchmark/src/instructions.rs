//! Named prompt instructions.
//!
//! An [`Instruction`] pairs a system prompt with a user template containing
//! `{input}` and `{context}` placeholders. Agents look instructions up by key
//! in an [`InstructionRegistry`], so a run can swap the wording of any stage
//! without touching agent code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::BenchError;

pub const NLQ_REFINEMENT: &str = "nlq_refinement";
pub const SQL_GENERATION: &str = "sql_generation";
pub const AMBIGUITY_DETECTION: &str = "ambiguity_detection";
pub const NL_TO_SQL: &str = "nl_to_sql";
pub const SUMMARIZATION: &str = "summarization";

const CUSTOM_PREFIX: &str = "custom_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub name: String,
    pub system_prompt: String,
    pub user_prompt_template: String,
    #[serde(default)]
    pub description: String,
}

/// System and user halves of a rendered instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl Instruction {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt_template: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            user_prompt_template: user_prompt_template.into(),
            description: description.into(),
        }
    }

    /// Substitute `{input}` and `{context}`; other braces are left alone.
    pub fn render(&self, input: &str, context: &str) -> RenderedPrompt {
        let mut user = String::with_capacity(self.user_prompt_template.len() + input.len() + context.len());
        let mut rest = self.user_prompt_template.as_str();
        while let Some(open) = rest.find('{') {
            user.push_str(&rest[..open]);
            let tail = &rest[open..];
            if let Some(after) = tail.strip_prefix("{input}") {
                user.push_str(input);
                rest = after;
            } else if let Some(after) = tail.strip_prefix("{context}") {
                user.push_str(context);
                rest = after;
            } else {
                user.push('{');
                rest = &tail[1..];
            }
        }
        user.push_str(rest);
        RenderedPrompt {
            system: self.system_prompt.clone(),
            user,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstructionRegistry {
    instructions: BTreeMap<String, Instruction>,
}

impl InstructionRegistry {
    /// A registry holding only the built-in instructions.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for instruction in default_instructions() {
            registry.register(instruction.name.clone(), instruction);
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            instructions: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, key: impl Into<String>, instruction: Instruction) {
        self.instructions.insert(key.into(), instruction);
    }

    pub fn get(&self, key: &str) -> Option<&Instruction> {
        self.instructions.get(key)
    }

    pub fn resolve(&self, key: &str) -> Result<&Instruction, BenchError> {
        self.get(key)
            .ok_or_else(|| BenchError::UnknownInstruction(key.to_string()))
    }

    /// Register a runtime instruction under `custom_<name>` and return that key.
    pub fn add_custom(
        &mut self,
        name: &str,
        system_prompt: &str,
        user_prompt_template: &str,
        description: &str,
    ) -> String {
        let key = format!("{CUSTOM_PREFIX}{name}");
        self.register(
            key.clone(),
            Instruction::new(name, system_prompt, user_prompt_template, description),
        );
        key
    }

    /// Keys with their descriptions, sorted by key.
    pub fn list(&self) -> impl Iterator<Item = (&str, &str)> {
        self.instructions
            .iter()
            .map(|(key, instruction)| (key.as_str(), instruction.description.as_str()))
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl Default for InstructionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

const TRANSACTION_FILTERS: &str = "\
1. P2P or person to person: \"(trim(pycode)) in ('NULL','0000','')\"
2. P2M: \"(trim(pycode)) not in ('NULL','0000','7407','')\"
3. P2PM: \"(trim(pycode)) in ('7407')\"
4. Autopay: \"initmode='11' and purposecode='14'\"
5. UPI International or IUPI: \"initmode='12' and payeracctype in ('NRE', 'NRO')\"
6. Tap and Pay: \"initmode='06'\"
7. UPI-LITE-X: \"initmode='06' and purposecode='45'\"
8. UPI-LITE: \"purposecode in ('41','42','43','44')\"
9. RCC_ON_UPI or CC_ON_UPI: \"payeracctype='CREDIT'\"
10. Credit Line: \"payeracctype in ('CREDITLINE', 'CREDITLINE01', ... 'CL015')\"
11. UPI circle: \"purposecode='87'\"
12. UPI IPO: \"purposecode='01' and pycode='6211' and initmode in ('11','13')\"
13. UPI-Mandate: \"purposecode='76' and pycode='6211' and initmode in ('11','13')\"";

const VPA_FILTERS: &str = "\
1. PhonePe: split(lower(trim(prfvaddr)),'@')[2] in ('axl','ibl','ybl')
2. Paytm: split(lower(trim(prfvaddr)),'@')[2] in ('paytm','ptyes','ptaxis','pthdfc','ptsbi','pytm0123456.ifsc.npci')
3. GooglePay: split(lower(trim(prfvaddr)),'@')[2] in ('okaxis','okhdfcbank','okicici','oksbi','okpayaxis','okbizaxis','okbizicici')
4. BHIM: split(lower(trim(prfvaddr)),'@')[2] in ('upi')";

const STATUS_FILTERS: &str = "\
1. Declined or failed: upper(trim(currstatusdesc)) IN ('FAILURE')
2. Technical declined: upi_masters.upi_new_errorcode_respcd_master.approvedflag = 'TD'
3. Business declined: upi_masters.upi_new_errorcode_respcd_master.approvedflag = 'BD'
4. Approved or successful: upper(trim(currstatusdesc)) IN ('SUCCESS', 'DEEMED', 'PARTIAL')";

fn nlq_refinement() -> Instruction {
    let system = format!(
        "[INST]
You are an expert at refining natural language queries into precise SQL generation commands.

### Task ###
Generate:
1. Improved natural language query
2. Combined column list

### Format Requirements ###
Strictly follow:
Refined Query: [text]
required_columns = [\"column1\", \"column2\"]

### Database Schema Context ###
Map colloquial terms to schema columns (example: \"mobile number\" -- \"prdmobile\", \"merchant code\" -- \"pycode\").
Explicitly state JOIN conditions using schema relationships.

### Filtering Guidelines ###
For all VARCHAR fields use UPPER(TRIM(column_name)) for consistency except for \"asdt\".

### Transaction filtering ###
{TRANSACTION_FILTERS}

### SQL condition for VPA filtering ###
{VPA_FILTERS}

### SQL condition for success and failure ###
{STATUS_FILTERS}

### Formatting Guidelines ###
1. Start with action verb: \"Generate/Fetch/Build an SQL query...\"
2. Use exact column names from schema.
3. Preserve original query intent.
4. Do not give any explanation or generate any SQL code.
[/INST]"
    );
    Instruction::new(
        NLQ_REFINEMENT,
        system,
        "Refine this natural language query:\n\n{input}\n\n{context}\n\nRefined Query:",
        "NLQ refinement with SQL preparation",
    )
}

fn sql_generation() -> Instruction {
    let system = format!(
        "[INST]
You are an expert SQL query generator for UPI transaction analysis.

### Handling Dates ###
1. For date fields in WHERE clause, use asdt (VARCHAR column) formatted as YYYY-MM-DD
2. To convert date to DATE, use CAST(asdt AS DATE) in SELECT clauses (not in WHERE)
3. If date not mentioned, consider asdt = current date

### Amount and Aggregations ###
1. For total amount/spends/revenue: CAST(SUM(txnamount) AS DOUBLE) / 100
2. For transaction count/volume: COUNT(*)
3. Average Transaction Value (ATV): CAST(SUM(txnamount) AS DOUBLE) / COUNT(*)
4. Unique/distinct user count: count(prdmobile)
5. GROUP BY cannot contain aggregations, window functions or grouping operations

### String Handling Consistency ###
1. Apply upper(trim(column)) to all VARCHAR fields except \"asdt\"
2. For merchant conditions use \"like\" instead of \"=\"
3. For bin-based queries, use first six digits: SUBSTR((praccno), 1, 6)

### SQL condition for success and failure ###
{STATUS_FILTERS}

### Transaction filtering ###
{TRANSACTION_FILTERS}

### SQL condition for VPA filtering ###
{VPA_FILTERS}

### Join Conditions ###
- Join with upi_mcc_master on prcode/pycode = mcc_code (for merchant details)
- Join with upi_new_errorcode_respcd_master on errorcode/finalrespcode (for error/decline details)
- Join with ifsc_lgpincode_master on prifsccode/pyifsccode = ifsc (for location details)
- Join with urcs_bank_master on nfsparticipantid (for bank details)

### SQL Generation Steps ###
1. Select appropriate columns from schema
2. Apply date filter using asdt column
3. Add necessary aggregations
4. Include proper grouping
5. Apply case transformations for text fields
[/INST]"
    );
    Instruction::new(
        SQL_GENERATION,
        system,
        "Generate SQL for this refined query:\n\n{input}\n\n{context}\n\nGenerate only the SQL query without explanations.\n\nSQL Query:",
        "SQL generation from refined NLQ",
    )
}

fn ambiguity_detection() -> Instruction {
    Instruction::new(
        AMBIGUITY_DETECTION,
        "You are an expert at analyzing natural language for ambiguity and clarity.
Assess whether queries are clear or contain ambiguous terms that need clarification.

Consider ambiguity in:
- Temporal references (which time period?)
- Entity references (which specific user/merchant?)
- Aggregation level (per day/week/month?)
- Business logic (which transaction type?)
- Data sources (which table/system?)

Provide clear classification and explanation.",
        "Analyze this query for ambiguity:\n\n{input}\n\n{context}\n\nProvide:\n1. Classification: Ambiguous or Clear\n2. Identified ambiguities (if any)\n3. Suggested clarifications\n\nAssessment:",
        "Detect ambiguity in queries",
    )
}

fn nl_to_sql() -> Instruction {
    Instruction::new(
        NL_TO_SQL,
        "You translate questions into a single SQL query. Answer with the SQL only.",
        "{context}\n\nConvert to SQL:\nQ: {input}\nSQL:",
        "Single-step natural language to SQL",
    )
}

fn summarization() -> Instruction {
    Instruction::new(
        SUMMARIZATION,
        "You are a professional summarizer. Keep the critical information and nothing else.",
        "Summarize:\n{input}\n\nSummary:",
        "Short summary of a document",
    )
}

fn default_instructions() -> Vec<Instruction> {
    vec![
        nlq_refinement(),
        sql_generation(),
        ambiguity_detection(),
        nl_to_sql(),
        summarization(),
    ]
}
