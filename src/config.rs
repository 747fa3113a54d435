use anyhow::{Result, anyhow, bail};
use reqwest::Url;
use serde::Deserialize;
use std::env;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "gemma3:27b";
pub const DEFAULT_NUM_CTX: u32 = 8192;
pub const DEFAULT_TOP_P: f64 = 0.95;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_ROUNDS: usize = 3;

pub const DEFAULT_MSB_SERVER_URL: &str = "http://127.0.0.1:5555";
pub const DEFAULT_SANDBOX_NAME: &str = "function-calling";
pub const DEFAULT_SANDBOX_NAMESPACE: &str = "default";
pub const DEFAULT_SANDBOX_IMAGE: &str = "microsandbox/python";
pub const DEFAULT_SANDBOX_MEMORY_MIB: u32 = 512;
pub const DEFAULT_SANDBOX_CPUS: u32 = 1;

const CONFIG_DIR_NAME: &str = "offline-fc";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub config_path: PathBuf,
    pub ollama_base_url: String,
    pub model: String,
    pub num_ctx: u32,
    pub top_p: f64,
    pub request_timeout_secs: u64,
    pub max_rounds: usize,
    pub preamble_file: Option<PathBuf>,
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    pub backend: BackendKind,
    pub server_url: String,
    pub api_key: Option<String>,
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub memory_mib: u32,
    pub cpus: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Microsandbox,
            server_url: DEFAULT_MSB_SERVER_URL.to_string(),
            api_key: None,
            name: DEFAULT_SANDBOX_NAME.to_string(),
            namespace: DEFAULT_SANDBOX_NAMESPACE.to_string(),
            image: DEFAULT_SANDBOX_IMAGE.to_string(),
            memory_mib: DEFAULT_SANDBOX_MEMORY_MIB,
            cpus: DEFAULT_SANDBOX_CPUS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Microsandbox,
    Local,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "microsandbox" => Ok(Self::Microsandbox),
            "local" => Ok(Self::Local),
            _ => Err(format!(
                "unknown backend '{value}', expected 'microsandbox' or 'local'"
            )),
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Microsandbox => write!(f, "microsandbox"),
            Self::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFileConfig {
    ollama_base_url: Option<String>,
    model: Option<String>,
    num_ctx: Option<u32>,
    top_p: Option<f64>,
    request_timeout_secs: Option<u64>,
    max_rounds: Option<usize>,
    preamble_file: Option<PathBuf>,
    sandbox: Option<RawSandboxConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSandboxConfig {
    backend: Option<String>,
    server_url: Option<String>,
    api_key: Option<String>,
    name: Option<String>,
    namespace: Option<String>,
    image: Option<String>,
    memory_mib: Option<u32>,
    cpus: Option<u32>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(explicit_path: Option<&Path>) -> Result<Self> {
        let (config_path, config_is_explicit) = match explicit_path {
            Some(path) => (path.to_path_buf(), true),
            None => (discover_config_path()?, false),
        };

        if config_is_explicit && !config_path.is_file() {
            bail!(
                "Failed to load config {}: file does not exist",
                config_path.display()
            );
        }

        let file_config = load_file_config(&config_path)?.unwrap_or_default();

        dotenvy::dotenv().ok();

        Self::resolve(config_path, file_config)
    }

    fn resolve(config_path: PathBuf, file: RawFileConfig) -> Result<Self> {
        let raw_sandbox = file.sandbox.unwrap_or_default();
        let defaults = SandboxConfig::default();

        let backend = match raw_sandbox.backend.as_deref().and_then(non_empty) {
            Some(value) => BackendKind::from_str(value)
                .map_err(|reason| config_error(&config_path, "sandbox.backend", &reason))?,
            None => defaults.backend,
        };

        let ollama_base_url = env_non_empty("OLLAMA_BASE_URL")
            .or_else(|| owned_non_empty(file.ollama_base_url.as_deref()))
            .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string());
        validate_url(&config_path, "ollama_base_url", &ollama_base_url)?;

        let server_url = env_non_empty("MSB_SERVER_URL")
            .or_else(|| owned_non_empty(raw_sandbox.server_url.as_deref()))
            .unwrap_or(defaults.server_url);
        validate_url(&config_path, "sandbox.server_url", &server_url)?;

        let top_p = file.top_p.unwrap_or(DEFAULT_TOP_P);
        if !(top_p > 0.0 && top_p <= 1.0) {
            return Err(config_error(
                &config_path,
                "top_p",
                "must be in the range (0, 1]",
            ));
        }

        let num_ctx = positive(&config_path, "num_ctx", file.num_ctx, DEFAULT_NUM_CTX)?;
        let request_timeout_secs = positive(
            &config_path,
            "request_timeout_secs",
            file.request_timeout_secs,
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        let memory_mib = positive(
            &config_path,
            "sandbox.memory_mib",
            raw_sandbox.memory_mib,
            defaults.memory_mib,
        )?;
        let cpus = positive(&config_path, "sandbox.cpus", raw_sandbox.cpus, defaults.cpus)?;

        let preamble_file = file
            .preamble_file
            .map(|path| resolve_relative(&config_path, path));

        Ok(Self {
            ollama_base_url,
            model: env_non_empty("OLLAMA_MODEL")
                .or_else(|| owned_non_empty(file.model.as_deref()))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            num_ctx,
            top_p,
            request_timeout_secs,
            max_rounds: file.max_rounds.unwrap_or(DEFAULT_MAX_ROUNDS),
            preamble_file,
            sandbox: SandboxConfig {
                backend,
                server_url,
                api_key: env_non_empty("MSB_API_KEY")
                    .or_else(|| owned_non_empty(raw_sandbox.api_key.as_deref())),
                name: owned_non_empty(raw_sandbox.name.as_deref()).unwrap_or(defaults.name),
                namespace: owned_non_empty(raw_sandbox.namespace.as_deref())
                    .unwrap_or(defaults.namespace),
                image: owned_non_empty(raw_sandbox.image.as_deref()).unwrap_or(defaults.image),
                memory_mib,
                cpus,
            },
            config_path,
        })
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let trimmed = xdg.trim();
        if trimmed.is_empty() {
            bail!("Failed to resolve config path: XDG_CONFIG_HOME is set but empty");
        }

        return Ok(PathBuf::from(trimmed)
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME));
    }

    let home = dirs::home_dir()
        .ok_or_else(|| anyhow!("Failed to resolve config path: HOME directory is unavailable"))?;

    Ok(home
        .join(".config")
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME))
}

fn load_file_config(config_path: &Path) -> Result<Option<RawFileConfig>> {
    if !config_path.is_file() {
        return Ok(None);
    }

    let config_text = fs::read_to_string(config_path).map_err(|err| {
        anyhow!(
            "Failed to load config {}: unable to read file: {err}",
            config_path.display()
        )
    })?;

    toml::from_str(&config_text)
        .map(Some)
        .map_err(|err| anyhow!("Failed to load config {}: {err}", config_path.display()))
}

fn validate_url(config_path: &Path, key_path: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|err| config_error(config_path, key_path, &format!("invalid URL '{value}': {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(config_error(
            config_path,
            key_path,
            &format!("unsupported URL scheme '{scheme}'"),
        )),
    }
}

fn positive<T>(config_path: &Path, key_path: &str, value: Option<T>, default: T) -> Result<T>
where
    T: PartialEq + Default + Copy,
{
    let value = value.unwrap_or(default);
    if value == T::default() {
        return Err(config_error(config_path, key_path, "must be greater than zero"));
    }
    Ok(value)
}

fn resolve_relative(config_path: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }

    match config_path.parent() {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| owned_non_empty(Some(&value)))
}

fn owned_non_empty(value: Option<&str>) -> Option<String> {
    value.and_then(non_empty).map(ToOwned::to_owned)
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn config_error(config_path: &Path, key_path: &str, reason: &str) -> anyhow::Error {
    anyhow!(
        "Failed to load config {}: {key_path}: {reason}",
        config_path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, BackendKind, DEFAULT_MODEL, DEFAULT_OLLAMA_BASE_URL, SandboxConfig};
    use serial_test::serial;
    use std::env;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::str::FromStr;

    fn reset_vars() {
        unsafe {
            env::remove_var("OLLAMA_BASE_URL");
            env::remove_var("OLLAMA_MODEL");
            env::remove_var("MSB_SERVER_URL");
            env::remove_var("MSB_API_KEY");
            env::remove_var("XDG_CONFIG_HOME");
        }
    }

    fn with_cwd<T>(path: &Path, f: impl FnOnce() -> T) -> T {
        let cwd = env::current_dir().expect("current dir");
        env::set_current_dir(path).expect("set current dir");
        let result = f();
        env::set_current_dir(cwd).expect("restore current dir");
        result
    }

    fn write_config(root: &Path, contents: &str) -> PathBuf {
        let config_dir = root.join("offline-fc");
        fs::create_dir_all(&config_dir).expect("create config dir");
        let path = config_dir.join("config.toml");
        fs::write(&path, contents).expect("write config");
        path
    }

    #[test]
    #[serial]
    fn load_uses_defaults_when_nothing_is_set() {
        let tmp = tempfile::tempdir().expect("tempdir");
        reset_vars();
        unsafe {
            env::set_var("XDG_CONFIG_HOME", tmp.path());
        }

        let cfg = with_cwd(tmp.path(), || AppConfig::load().expect("load config"));
        assert_eq!(cfg.ollama_base_url, DEFAULT_OLLAMA_BASE_URL);
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert_eq!(cfg.num_ctx, 8192);
        assert_eq!(cfg.top_p, 0.95);
        assert_eq!(cfg.request_timeout_secs, 300);
        assert_eq!(cfg.max_rounds, 3);
        assert_eq!(cfg.preamble_file, None);
        assert_eq!(cfg.sandbox, SandboxConfig::default());
        assert_eq!(
            cfg.config_path,
            tmp.path().join("offline-fc").join("config.toml")
        );
    }

    #[test]
    #[serial]
    fn load_reads_file_values() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_config(
            tmp.path(),
            r#"
ollama_base_url = "http://gpu-box:11434/"
model = "llama3.1:8b"
num_ctx = 4096
top_p = 0.9
max_rounds = 5
preamble_file = "functions.py"

[sandbox]
backend = "local"
name = "weather"
memory_mib = 1024
cpus = 2
"#,
        );

        reset_vars();
        unsafe {
            env::set_var("XDG_CONFIG_HOME", tmp.path());
        }

        let cfg = with_cwd(tmp.path(), || AppConfig::load().expect("load config"));
        assert_eq!(cfg.ollama_base_url, "http://gpu-box:11434/");
        assert_eq!(cfg.model, "llama3.1:8b");
        assert_eq!(cfg.num_ctx, 4096);
        assert_eq!(cfg.top_p, 0.9);
        assert_eq!(cfg.max_rounds, 5);
        assert_eq!(
            cfg.preamble_file,
            Some(tmp.path().join("offline-fc").join("functions.py"))
        );
        assert_eq!(cfg.sandbox.backend, BackendKind::Local);
        assert_eq!(cfg.sandbox.name, "weather");
        assert_eq!(cfg.sandbox.namespace, "default");
        assert_eq!(cfg.sandbox.memory_mib, 1024);
        assert_eq!(cfg.sandbox.cpus, 2);
    }

    #[test]
    #[serial]
    fn load_env_overrides_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_config(
            tmp.path(),
            r#"
model = "file_model"
ollama_base_url = "http://file:11434"

[sandbox]
server_url = "http://file:5555"
api_key = "file_key"
"#,
        );

        reset_vars();
        unsafe {
            env::set_var("XDG_CONFIG_HOME", tmp.path());
            env::set_var("OLLAMA_MODEL", "os_model");
            env::set_var("MSB_API_KEY", "os_key");
        }

        let cfg = with_cwd(tmp.path(), || AppConfig::load().expect("load config"));
        assert_eq!(cfg.model, "os_model");
        assert_eq!(cfg.ollama_base_url, "http://file:11434");
        assert_eq!(cfg.sandbox.server_url, "http://file:5555");
        assert_eq!(cfg.sandbox.api_key.as_deref(), Some("os_key"));
    }

    #[test]
    #[serial]
    fn load_does_not_override_existing_os_env_with_dotenv() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(
            tmp.path().join(".env"),
            "OLLAMA_MODEL=dotenv_model\nMSB_API_KEY=dotenv_key\n",
        )
        .expect("write env file");

        reset_vars();
        unsafe {
            env::set_var("XDG_CONFIG_HOME", tmp.path());
            env::set_var("OLLAMA_MODEL", "os_model");
        }

        let cfg = with_cwd(tmp.path(), || AppConfig::load().expect("load config"));
        assert_eq!(cfg.model, "os_model");
        assert_eq!(cfg.sandbox.api_key.as_deref(), Some("dotenv_key"));
        reset_vars();
    }

    #[test]
    #[serial]
    fn blank_values_fall_back_to_defaults() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_config(tmp.path(), "model = \"   \"\n");

        reset_vars();
        unsafe {
            env::set_var("XDG_CONFIG_HOME", tmp.path());
            env::set_var("OLLAMA_BASE_URL", "  ");
        }

        let cfg = with_cwd(tmp.path(), || AppConfig::load().expect("load config"));
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert_eq!(cfg.ollama_base_url, DEFAULT_OLLAMA_BASE_URL);
    }

    #[test]
    #[serial]
    fn load_with_explicit_path_ignores_xdg() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_config(tmp.path(), "model = \"xdg_model\"\n");
        let explicit = tmp.path().join("custom.toml");
        fs::write(&explicit, "model = \"explicit_model\"\n").expect("write explicit config");

        reset_vars();
        unsafe {
            env::set_var("XDG_CONFIG_HOME", tmp.path());
        }

        let cfg = with_cwd(tmp.path(), || {
            AppConfig::load_with_path(Some(&explicit)).expect("load config")
        });
        assert_eq!(cfg.model, "explicit_model");
        assert_eq!(cfg.config_path, explicit);
    }

    #[test]
    #[serial]
    fn load_with_missing_explicit_path_fails() {
        let tmp = tempfile::tempdir().expect("tempdir");
        reset_vars();

        let missing = tmp.path().join("missing.toml");
        let err = with_cwd(tmp.path(), || {
            AppConfig::load_with_path(Some(&missing)).expect_err("load should fail")
        });
        assert!(err.to_string().contains("file does not exist"));
    }

    #[test]
    #[serial]
    fn load_fails_when_xdg_config_home_is_empty() {
        reset_vars();
        unsafe {
            env::set_var("XDG_CONFIG_HOME", "   ");
        }

        let err = AppConfig::load().expect_err("load should fail");
        assert!(
            err.to_string()
                .contains("Failed to resolve config path: XDG_CONFIG_HOME is set but empty")
        );
        reset_vars();
    }

    #[test]
    #[serial]
    fn load_fails_on_unknown_root_key() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_config(tmp.path(), "unknown_key = 1");

        reset_vars();
        unsafe {
            env::set_var("XDG_CONFIG_HOME", tmp.path());
        }

        let err = with_cwd(tmp.path(), || AppConfig::load().expect_err("load should fail"));
        assert!(err.to_string().contains("Failed to load config"));
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    #[serial]
    fn load_fails_on_unknown_backend() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_config(tmp.path(), "[sandbox]\nbackend = \"docker\"\n");

        reset_vars();
        unsafe {
            env::set_var("XDG_CONFIG_HOME", tmp.path());
        }

        let err = with_cwd(tmp.path(), || AppConfig::load().expect_err("load should fail"));
        assert!(
            err.to_string()
                .contains("sandbox.backend: unknown backend 'docker'")
        );
    }

    #[test]
    #[serial]
    fn load_fails_on_invalid_url() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_config(tmp.path(), "[sandbox]\nserver_url = \"not a url\"\n");

        reset_vars();
        unsafe {
            env::set_var("XDG_CONFIG_HOME", tmp.path());
        }

        let err = with_cwd(tmp.path(), || AppConfig::load().expect_err("load should fail"));
        assert!(err.to_string().contains("sandbox.server_url: invalid URL"));
    }

    #[test]
    #[serial]
    fn load_fails_on_out_of_range_numbers() {
        let tmp = tempfile::tempdir().expect("tempdir");

        reset_vars();
        unsafe {
            env::set_var("XDG_CONFIG_HOME", tmp.path());
        }

        write_config(tmp.path(), "top_p = 1.5\n");
        let err = with_cwd(tmp.path(), || AppConfig::load().expect_err("top_p"));
        assert!(err.to_string().contains("top_p: must be in the range (0, 1]"));

        write_config(tmp.path(), "[sandbox]\ncpus = 0\n");
        let err = with_cwd(tmp.path(), || AppConfig::load().expect_err("cpus"));
        assert!(err.to_string().contains("sandbox.cpus: must be greater than zero"));
    }

    #[test]
    fn backend_kind_parses_known_names() {
        assert_eq!(
            BackendKind::from_str("microsandbox"),
            Ok(BackendKind::Microsandbox)
        );
        assert_eq!(BackendKind::from_str("local"), Ok(BackendKind::Local));
        assert!(BackendKind::from_str("LOCAL").is_err());
        assert_eq!(BackendKind::Local.to_string(), "local");
    }
}
