use crate::error::{to_env_var, ConfigError, ENV_PREFIX};
use bastion::dual_llm::config::{DualLlmConfig, DEFAULT_MAX_ROUNDS, DEFAULT_MODEL};
use bastion::policy::rule::{TrustedDataPolicy, UnmatchedToolTrust};
use bastion::providers::openai::OPENAI_DEFAULT_HOST;
use config::{Config, Environment};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Where each provider's chat endpoint lives
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSettings {
    #[serde(default = "default_openai_host")]
    pub openai_host: String,
    #[serde(default = "default_anthropic_host")]
    pub anthropic_host: String,
    #[serde(default = "default_gemini_host")]
    pub gemini_host: String,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            openai_host: default_openai_host(),
            anthropic_host: default_anthropic_host(),
            gemini_host: default_gemini_host(),
        }
    }
}

/// Seed for the dual-LLM configuration store
#[derive(Debug, Clone, Deserialize)]
pub struct DualLlmSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_model")]
    pub main_model: String,
    #[serde(default = "default_model")]
    pub quarantined_model: String,
    /// OpenAI compatible host the quarantine models are called on
    #[serde(default = "default_openai_host")]
    pub host: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for DualLlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_rounds: default_max_rounds(),
            main_model: default_model(),
            quarantined_model: default_model(),
            host: default_openai_host(),
            timeout_secs: None,
        }
    }
}

impl DualLlmSettings {
    pub fn to_config(&self) -> DualLlmConfig {
        DualLlmConfig {
            main_model: self.main_model.clone(),
            quarantined_model: self.quarantined_model.clone(),
            ..DualLlmConfig::default()
        }
        .enabled(self.enabled)
        .with_max_rounds(self.max_rounds)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicySettings {
    /// YAML file holding a `policies` list
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub unmatched: UnmatchedToolTrust,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub upstream: UpstreamSettings,
    #[serde(default)]
    pub dual_llm: DualLlmSettings,
    #[serde(default)]
    pub policy: PolicySettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // Extract field name from error message "missing field `server`"
                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policies: Vec<TrustedDataPolicy>,
}

/// Read trusted-data policies from a YAML file, in file order
pub fn load_policies<P: AsRef<Path>>(path: P) -> Result<Vec<TrustedDataPolicy>, ConfigError> {
    let path = path.as_ref();
    let policy_error = |message: String| ConfigError::PolicyFile {
        path: path.display().to_string(),
        message,
    };

    let content = std::fs::read_to_string(path).map_err(|e| policy_error(e.to_string()))?;
    let file: PolicyFile =
        serde_yaml::from_str(&content).map_err(|e| policy_error(e.to_string()))?;
    Ok(file.policies)
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_rounds() -> u32 {
    DEFAULT_MAX_ROUNDS
}

fn default_openai_host() -> String {
    OPENAI_DEFAULT_HOST.to_string()
}

fn default_anthropic_host() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_gemini_host() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion::policy::rule::{PolicyAction, PolicyOperator};
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("BASTION_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.upstream.openai_host, "https://api.openai.com");
        assert_eq!(settings.upstream.anthropic_host, "https://api.anthropic.com");
        assert!(!settings.dual_llm.enabled);
        assert_eq!(settings.dual_llm.max_rounds, 5);
        assert_eq!(settings.dual_llm.timeout(), None);
        assert_eq!(settings.policy.file, None);
        assert_eq!(settings.policy.unmatched, UnmatchedToolTrust::Trusted);
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("BASTION_SERVER__PORT", "8080");
        env::set_var("BASTION_DUAL_LLM__ENABLED", "true");
        env::set_var("BASTION_DUAL_LLM__MAX_ROUNDS", "2");
        env::set_var("BASTION_DUAL_LLM__MAIN_MODEL", "gpt-4o-mini");
        env::set_var("BASTION_DUAL_LLM__TIMEOUT_SECS", "30");
        env::set_var("BASTION_UPSTREAM__GEMINI_HOST", "http://localhost:9999");
        env::set_var("BASTION_POLICY__UNMATCHED", "untrusted");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.upstream.gemini_host, "http://localhost:9999");
        assert_eq!(settings.policy.unmatched, UnmatchedToolTrust::Untrusted);

        let config = settings.dual_llm.to_config();
        assert!(config.enabled);
        assert_eq!(config.max_rounds, 2);
        assert_eq!(config.main_model, "gpt-4o-mini");
        assert_eq!(config.quarantined_model, "gpt-4o");
        assert_eq!(settings.dual_llm.timeout(), Some(Duration::from_secs(30)));

        clean_env();
    }

    #[test]
    fn test_missing_section_names_env_var() {
        let config = Config::builder().build().unwrap();
        match Settings::from_config(config) {
            Err(ConfigError::MissingEnvVar { env_var }) => {
                assert_eq!(env_var, "BASTION_SERVER")
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_socket_addr_conversion() {
        let server_settings = ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 3000,
        };
        let addr = server_settings.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn test_load_policies() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
policies:
  - agentId: agent-1
    toolName: read_file
    description: system credentials
    attributePath: path
    operator: contains
    value: /etc/passwd
    action: block_always
  - agentId: agent-1
    mcpServerName: web
    toolName: fetch
    attributePath: url
    operator: regex
    value: "^https://internal\\."
    action: mark_as_untrusted
"#
        )
        .unwrap();

        let policies = load_policies(file.path()).unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0].operator, PolicyOperator::Contains);
        assert_eq!(policies[0].action, PolicyAction::BlockAlways);
        assert_eq!(policies[1].mcp_server_name.as_deref(), Some("web"));
        assert_eq!(policies[1].value, r"^https://internal\.");
        assert_ne!(policies[0].id, policies[1].id);
    }

    #[test]
    fn test_missing_policy_file() {
        let err = load_policies("/nonexistent/policies.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::PolicyFile { .. }));
    }
}
