use serde::Deserialize;

use crate::error::ConfigError;

pub const USAGE: &str = "
Usage: camdrop [options]
       camdrop (-h | --help)

Options:
    -h, --help           Show this message.
    --repo REPO          Target GitHub repository as owner/name [env: GITHUB_REPO]
    --api-base URL       GitHub API root [env: GITHUB_API_BASE; https://api.github.com]
    --images-root DIR    Repository folder for images [env: IMAGES_ROOT; images]
    --index-path PATH    Repository path of the image manifest [env: INDEX_PATH; images.json]
    --bind ADDR          Address to listen on [env: BIND_ADDRESS; 0.0.0.0]
    --port PORT          Port to listen on [env: PORT; 5000]
    --timeout SECS       Timeout for calls to GitHub [env: REMOTE_TIMEOUT; 20]
    --max-body BYTES     Largest accepted image [env: MAX_BODY_BYTES; 10485760]
    --no-index           Only store images, never touch the manifest [env: DISABLE_INDEX]

The GitHub token is read from GITHUB_TOKEN only.
";

const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_IMAGES_ROOT: &str = "images";
const DEFAULT_INDEX_PATH: &str = "images.json";
const DEFAULT_BIND: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MAX_BODY: usize = 10 * 1024 * 1024;

#[derive(Deserialize, Debug, Default)]
pub struct Args {
    pub flag_repo: Option<String>,
    pub flag_api_base: Option<String>,
    pub flag_images_root: Option<String>,
    pub flag_index_path: Option<String>,
    pub flag_bind: Option<String>,
    pub flag_port: Option<String>,
    pub flag_timeout: Option<String>,
    pub flag_max_body: Option<String>,
    pub flag_no_index: bool,
}

/// Where and how to reach the GitHub contents API.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub api_base: String,
    pub owner: String,
    pub name: String,
    pub token: String,
    pub timeout: std::time::Duration,
}

impl RemoteConfig {
    /// `owner/name`
    pub fn repo(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub remote: RemoteConfig,
    pub images_root: String,
    /// `None` when manifest maintenance is switched off.
    pub index_path: Option<String>,
    pub bind: String,
    pub port: u16,
    pub max_body: usize,
}

impl Config {
    /// Flags win over the environment, the environment over defaults.
    /// The docopt usage above only documents the variable names, defaults
    /// are applied here so an unset flag can still fall back to `env`.
    pub fn resolve<F>(args: &Args, env: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |flag: &Option<String>, var: &str| -> Option<String> {
            flag.clone()
                .or_else(|| env(var))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let token = env("GITHUB_TOKEN")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("GITHUB_TOKEN"))?;

        let repo = pick(&args.flag_repo, "GITHUB_REPO").ok_or(ConfigError::Missing("GITHUB_REPO"))?;
        let (owner, name) = parse_repo(&repo)?;

        let api_base = pick(&args.flag_api_base, "GITHUB_API_BASE")
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let images_root = repo_path(
            "IMAGES_ROOT",
            pick(&args.flag_images_root, "IMAGES_ROOT").unwrap_or_else(|| DEFAULT_IMAGES_ROOT.to_string()),
        )?;

        let index_disabled = args.flag_no_index
            || env("DISABLE_INDEX")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false);
        let index_path = if index_disabled {
            None
        } else {
            Some(repo_path(
                "INDEX_PATH",
                pick(&args.flag_index_path, "INDEX_PATH").unwrap_or_else(|| DEFAULT_INDEX_PATH.to_string()),
            )?)
        };

        let bind = pick(&args.flag_bind, "BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let port = number("PORT", pick(&args.flag_port, "PORT"), DEFAULT_PORT)?;
        let timeout_secs = number(
            "REMOTE_TIMEOUT",
            pick(&args.flag_timeout, "REMOTE_TIMEOUT"),
            DEFAULT_TIMEOUT_SECS,
        )?;
        let max_body = number(
            "MAX_BODY_BYTES",
            pick(&args.flag_max_body, "MAX_BODY_BYTES"),
            DEFAULT_MAX_BODY,
        )?;

        Ok(Config {
            remote: RemoteConfig {
                api_base,
                owner,
                name,
                token,
                timeout: std::time::Duration::from_secs(timeout_secs),
            },
            images_root,
            index_path,
            bind,
            port,
            max_body,
        })
    }
}

/// split a repo string of the form owner/name
fn parse_repo(s: &str) -> Result<(String, String), ConfigError> {
    let re = regex::Regex::new(r"^([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)$").map_err(|e| {
        ConfigError::Invalid {
            name: "GITHUB_REPO",
            reason: e.to_string(),
        }
    })?;
    match re.captures(s) {
        Some(caps) => Ok((caps[1].to_string(), caps[2].to_string())),
        None => Err(ConfigError::Invalid {
            name: "GITHUB_REPO",
            reason: format!("expected owner/name, got {:?}", s),
        }),
    }
}

fn repo_path(name: &'static str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid {
            name,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn number<T>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: format!("{:?}: {}", v, e),
        }),
    }
}
