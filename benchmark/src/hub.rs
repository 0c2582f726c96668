//! Model download through the HuggingFace Hub cache.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hf_hub::api::sync::{Api, ApiBuilder};
use hf_hub::api::Siblings;
use hf_hub::{Cache, Repo, RepoType};
use tracing::{debug, info};

use crate::error::BenchError;

const DEFAULT_REVISION: &str = "main";

/// Where a model identifier points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSpec {
    Local(PathBuf),
    Hub {
        repo_id: String,
        filename: Option<String>,
        revision: String,
    },
}

impl ModelSpec {
    /// Accepts `org/repo`, `org/repo:file.gguf`, `org/repo@rev:file.gguf` or a `.gguf` path.
    pub fn parse(model_id: &str) -> Result<Self, BenchError> {
        let model_id = model_id.trim();
        let path = Path::new(model_id);
        if path.is_file() || (model_id.ends_with(".gguf") && !model_id.contains(':')) {
            return Ok(ModelSpec::Local(path.to_path_buf()));
        }

        let (repo_part, filename) = match model_id.split_once(':') {
            Some((repo, file)) if !file.is_empty() => (repo, Some(file.to_string())),
            Some(_) => return Err(BenchError::Config(format!("empty filename in '{model_id}'"))),
            None => (model_id, None),
        };
        let (repo_id, revision) = match repo_part.split_once('@') {
            Some((repo, rev)) if !rev.is_empty() => (repo, rev),
            Some(_) => return Err(BenchError::Config(format!("empty revision in '{model_id}'"))),
            None => (repo_part, DEFAULT_REVISION),
        };
        match repo_id.split_once('/') {
            Some((org, name)) if !org.is_empty() && !name.is_empty() && !name.contains('/') => {}
            _ => {
                return Err(BenchError::Config(format!(
                    "'{model_id}' is neither a .gguf file nor an org/repo identifier"
                )))
            }
        }
        Ok(ModelSpec::Hub {
            repo_id: repo_id.to_string(),
            filename,
            revision: revision.to_string(),
        })
    }
}

/// Resolves a model identifier to a local weights file, fetching it if needed.
pub trait ModelHub {
    fn download(&self, model_id: &str) -> Result<PathBuf, BenchError>;
}

pub struct HfModelHub {
    cache_dir: PathBuf,
    endpoint: Option<String>,
    token: Option<String>,
    progress: bool,
}

impl HfModelHub {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            endpoint: None,
            token: None,
            progress: true,
        }
    }

    /// Picks up `HF_ENDPOINT` and the usual token variables.
    pub fn from_env(cache_dir: impl Into<PathBuf>) -> Self {
        let mut hub = Self::new(cache_dir);
        hub.endpoint = std::env::var("HF_ENDPOINT").ok();
        hub.token = hf_token();
        hub
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn build_api(&self, cache: Cache) -> Result<Api, String> {
        let mut builder = ApiBuilder::from_cache(cache).with_progress(self.progress);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.with_endpoint(endpoint.clone());
        }
        if let Some(token) = &self.token {
            builder = builder.with_token(Some(token.clone()));
        }
        builder.build().map_err(|e| format!("HuggingFace API error: {e}"))
    }

    fn fetch(&self, model_id: &str, repo_id: &str, filename: Option<&str>, revision: &str) -> Result<PathBuf, BenchError> {
        let download_error = |message: String| BenchError::Download {
            model: model_id.to_string(),
            message,
        };

        let cache = Cache::new(self.cache_dir.clone());
        let repo = Repo::with_revision(repo_id.to_string(), RepoType::Model, revision.to_string());

        let cached = match filename {
            Some(filename) => cache.repo(repo.clone()).get(filename),
            None => pick_cached_gguf(&cache, &repo, model_id)?,
        };
        if let Some(path) = cached {
            info!("Cache hit for {}: {}", model_id, path.display());
            return Ok(path);
        }

        let api = self.build_api(cache).map_err(download_error)?;
        let api_repo = api.repo(repo);
        let filename = match filename {
            Some(filename) => filename.to_string(),
            None => {
                let info = api_repo
                    .info()
                    .map_err(|e| download_error(format!("HuggingFace API error: {e}")))?;
                select_gguf_filename(&info.siblings)?
            }
        };

        info!("Downloading {} from {}", filename, repo_id);
        api_repo
            .get(&filename)
            .map_err(|e| download_error(format!("HuggingFace download error: {e}")))
    }
}

impl ModelHub for HfModelHub {
    fn download(&self, model_id: &str) -> Result<PathBuf, BenchError> {
        match ModelSpec::parse(model_id)? {
            ModelSpec::Local(path) => {
                if path.is_file() {
                    debug!("Using local model file {}", path.display());
                    Ok(path)
                } else {
                    Err(BenchError::Download {
                        model: model_id.to_string(),
                        message: format!("local model file {} not found", path.display()),
                    })
                }
            }
            ModelSpec::Hub {
                repo_id,
                filename,
                revision,
            } => self.fetch(model_id, &repo_id, filename.as_deref(), &revision),
        }
    }
}

fn pick_cached_gguf(cache: &Cache, repo: &Repo, model_id: &str) -> Result<Option<PathBuf>, BenchError> {
    let cache_error = |message: String| BenchError::Download {
        model: model_id.to_string(),
        message,
    };
    let repo_dir = cache.path().join(repo.folder_name());
    let ref_path = repo_dir.join("refs").join(repo.revision());
    let commit_hash = match fs::read_to_string(&ref_path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(cache_error(format!(
                "cannot read cache ref {}: {err}",
                ref_path.display()
            )))
        }
    };
    let commit_hash = commit_hash.trim();
    if commit_hash.is_empty() {
        return Ok(None);
    }
    let snapshot_dir = repo_dir.join("snapshots").join(commit_hash);
    if !snapshot_dir.is_dir() {
        return Ok(None);
    }

    let mut candidates = Vec::new();
    collect_gguf_files(&snapshot_dir, &mut candidates)
        .map_err(|e| cache_error(format!("cannot read cache snapshot {}: {e}", snapshot_dir.display())))?;
    match candidates.len() {
        0 => Ok(None),
        1 => Ok(candidates.pop()),
        n => Err(BenchError::Config(format!(
            "{n} GGUF files cached for {}; name one with org/repo:file.gguf",
            repo.url_revision()
        ))),
    }
}

fn collect_gguf_files(dir: &Path, candidates: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_gguf_files(&path, candidates)?;
        } else if path.extension().and_then(|ext| ext.to_str()) == Some("gguf") {
            candidates.push(path);
        }
    }
    Ok(())
}

fn select_gguf_filename(siblings: &[Siblings]) -> Result<String, BenchError> {
    let mut gguf_files: Vec<String> = siblings
        .iter()
        .map(|sibling| sibling.rfilename.clone())
        .filter(|name| name.ends_with(".gguf"))
        .collect();
    gguf_files.sort();
    match gguf_files.len() {
        0 => Err(BenchError::Config("no GGUF files in repository".to_string())),
        1 => Ok(gguf_files.remove(0)),
        _ => Err(BenchError::Config(format!(
            "several GGUF files in repository ({}); name one with org/repo:file.gguf",
            gguf_files.join(", ")
        ))),
    }
}

fn hf_token() -> Option<String> {
    std::env::var("HF_TOKEN")
        .ok()
        .or_else(|| std::env::var("HUGGINGFACE_TOKEN").ok())
        .or_else(|| std::env::var("HUGGINGFACE_HUB_TOKEN").ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    /// Lay out one cached snapshot the way the hub client does.
    fn seed_cache(root: &Path, folder: &str, files: &[&str]) {
        let repo_dir = root.join(folder);
        let snapshot = repo_dir.join("snapshots").join("abc123");
        fs::create_dir_all(&snapshot).unwrap();
        fs::create_dir_all(repo_dir.join("refs")).unwrap();
        fs::write(repo_dir.join("refs").join("main"), "abc123").unwrap();
        for file in files {
            fs::write(snapshot.join(file), b"GGUF").unwrap();
        }
    }

    fn offline_hub(root: &Path) -> HfModelHub {
        // nothing listens on the discard port
        HfModelHub::new(root)
            .with_endpoint("http://127.0.0.1:9")
            .with_progress(false)
    }

    #[test]
    fn parses_identifier_forms() {
        assert_eq!(
            ModelSpec::parse("org/name").unwrap(),
            ModelSpec::Hub {
                repo_id: "org/name".into(),
                filename: None,
                revision: "main".into()
            }
        );
        assert_eq!(
            ModelSpec::parse("org/name@v2:model.Q4_K_M.gguf").unwrap(),
            ModelSpec::Hub {
                repo_id: "org/name".into(),
                filename: Some("model.Q4_K_M.gguf".into()),
                revision: "v2".into()
            }
        );
        assert_eq!(
            ModelSpec::parse("./models/tiny.gguf").unwrap(),
            ModelSpec::Local(PathBuf::from("./models/tiny.gguf"))
        );
        assert!(ModelSpec::parse("not-a-repo").is_err());
        assert!(ModelSpec::parse("org/name:").is_err());
    }

    #[test]
    fn second_download_is_a_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        seed_cache(dir.path(), "models--org--name", &["model.gguf"]);
        let hub = offline_hub(dir.path());

        let first = hub.download("org/name:model.gguf").unwrap();
        let second = hub.download("org/name:model.gguf").unwrap();

        assert_eq!(first, second);
        assert!(first.ends_with("snapshots/abc123/model.gguf"));
    }

    #[test]
    fn single_cached_gguf_is_picked_without_filename() {
        let dir = tempfile::tempdir().unwrap();
        seed_cache(dir.path(), "models--org--name", &["only.gguf", "README.md"]);
        let path = offline_hub(dir.path()).download("org/name").unwrap();
        assert!(path.ends_with("only.gguf"));
    }

    #[test]
    fn several_cached_ggufs_need_a_filename() {
        let dir = tempfile::tempdir().unwrap();
        seed_cache(dir.path(), "models--org--name", &["a.gguf", "b.gguf"]);
        let err = offline_hub(dir.path()).download("org/name").unwrap_err();
        assert!(matches!(err, BenchError::Config(_)));
    }

    #[test]
    fn unreadable_cache_ref_is_a_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let refs = dir.path().join("models--org--name").join("refs");
        // a directory where the ref file should be
        fs::create_dir_all(refs.join("main")).unwrap();

        let err = offline_hub(dir.path()).download("org/name").unwrap_err();

        assert!(matches!(&err, BenchError::Download { model, .. } if model == "org/name"));
        assert_eq!(err.kind(), ErrorKind::Resource);
    }

    #[test]
    fn missing_local_file_is_a_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.gguf");
        let err = offline_hub(dir.path())
            .download(&missing.to_string_lossy())
            .unwrap_err();
        assert!(matches!(err, BenchError::Download { .. }));
    }

    #[test]
    fn picks_single_sibling() {
        let siblings: Vec<Siblings> = serde_json::from_str(
            r#"[{"rfilename": "config.json"}, {"rfilename": "tiny.Q8_0.gguf"}]"#,
        )
        .unwrap();
        assert_eq!(select_gguf_filename(&siblings).unwrap(), "tiny.Q8_0.gguf");
    }
}
