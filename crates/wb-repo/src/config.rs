//! `workbench.yml`: apps, services, development, setup, build and networks.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;

/// File name of the configuration at the repository root.
pub const CONFIG_FILE: &str = "workbench.yml";

/// Whether and how an app is exposed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProxyMode {
    /// Proxied behind auth (`true`) or not at all (`false`).
    Enabled(bool),
    /// Proxied without auth.
    Public(PublicTag),
}

/// The literal `public`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublicTag {
    /// `public`
    #[serde(rename = "public")]
    Public,
}

/// An interactive app.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Command line; the first word is the program.
    pub run: String,
    /// Icon path or URI.
    #[serde(skip_serializing_if = "Option::is_none", alias = "app_icon")]
    pub app_icon: Option<String>,
    /// Environment passed to the process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    /// Extra arguments appended after those in `run`.
    #[serde(skip_serializing_if = "Option::is_none", alias = "cli_args")]
    pub cli_args: Option<Vec<Value>>,
    /// Port the app listens on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Exposure through the reverse proxy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyMode>,
}

impl AppConfig {
    /// `cli_args` rendered as strings; string values are taken verbatim.
    pub fn args(&self) -> Vec<String> {
        self.cli_args
            .iter()
            .flatten()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

/// Restart behaviour of a service container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Never restart.
    No,
    /// Always restart.
    Always,
    /// Restart unless explicitly stopped.
    UnlessStopped,
    /// Restart on non-zero exit.
    OnFailure,
}

fn default_restart_policy() -> Option<RestartPolicy> {
    Some(RestartPolicy::Always)
}

/// A background service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Command, environment and exposure, as for apps.
    #[serde(flatten)]
    pub app: AppConfig,
    /// Container restart policy.
    #[serde(default = "default_restart_policy", alias = "restart_policy")]
    pub restart_policy: Option<RestartPolicy>,
    /// Retries before giving up.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "max_retry_count")]
    pub max_retry_count: Option<u32>,
    /// Accept cookie authentication when proxied.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "cookie_auth")]
    pub cookie_auth: Option<bool>,
    /// Fixed subdomain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
}

/// A language server, either as a bare command or with its languages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LanguageServiceEntry {
    /// Command only.
    Command(String),
    /// Command plus editor language selectors.
    Detailed {
        /// Command starting the server.
        #[serde(default)]
        cmd: String,
        /// Languages served.
        #[serde(default)]
        languages: Vec<String>,
    },
}

impl LanguageServiceEntry {
    /// Command starting the server.
    pub fn command(&self) -> &str {
        match self {
            Self::Command(cmd) | Self::Detailed { cmd, .. } => cmd,
        }
    }
}

/// Editor experience.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Development {
    /// Newline separated glob patterns hidden from listings.
    pub ignore: String,
    /// Language servers by name.
    #[serde(skip_serializing_if = "Option::is_none", alias = "language_service")]
    pub language_service: Option<BTreeMap<String, LanguageServiceEntry>>,
}

impl Development {
    /// Non-empty ignore patterns.
    pub fn ignore_patterns(&self) -> Vec<&str> {
        self.ignore.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
    }

    /// Language server commands keyed by name.
    pub fn language_servers(&self) -> BTreeMap<String, String> {
        self.language_service
            .iter()
            .flatten()
            .map(|(name, entry)| (name.clone(), entry.command().to_string()))
            .collect()
    }
}

/// Container setup on fresh boot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetupConfig {
    /// Extra apt packages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<String>>,
    /// Shell script run as the unprivileged user.
    #[serde(skip_serializing_if = "Option::is_none", alias = "setup_script")]
    pub setup_script: Option<String>,
}

/// Build command and watch settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    /// Command run with `bash -c`.
    pub cmd: String,
    /// Rerun on matching file changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch: Option<bool>,
    /// Newline separated glob patterns that trigger a rebuild.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "file_patterns")]
    pub file_patterns: Option<String>,
    /// Build before every app run.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "run_before_apps")]
    pub run_before_apps: Option<bool>,
}

impl BuildConfig {
    /// Non-empty watch patterns.
    pub fn patterns(&self) -> Vec<&str> {
        self.file_patterns
            .as_deref()
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect()
    }
}

/// The whole `workbench.yml`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchConfig {
    /// Interactive apps by name.
    pub apps: BTreeMap<String, AppConfig>,
    /// Background services by name.
    pub services: BTreeMap<String, ServiceConfig>,
    /// Editor experience.
    pub development: Development,
    /// Fresh-boot setup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup: Option<SetupConfig>,
    /// Build settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildConfig>,
    /// Extra networks the editor container joins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub networks: Option<Vec<String>>,
}

impl WorkbenchConfig {
    /// Config used when none could be loaded: one `python` app.
    pub fn fallback() -> Self {
        let mut apps = BTreeMap::new();
        let _ = apps.insert(
            "MyApp".to_string(),
            AppConfig {
                run: "python".to_string(),
                ..AppConfig::default()
            },
        );
        Self {
            apps,
            ..Self::default()
        }
    }

    /// Parse YAML.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Render as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// App or service command by name, apps first.
    pub fn app_or_service(&self, name: &str) -> Option<&AppConfig> {
        self.apps
            .get(name)
            .or_else(|| self.services.get(name).map(|s| &s.app))
    }

    /// Networks to keep the editor attached to.
    pub fn desired_networks(&self) -> &[String] {
        self.networks.as_deref().unwrap_or_default()
    }

    /// Packages to install on fresh boot.
    pub fn packages(&self) -> &[String] {
        self.setup
            .as_ref()
            .and_then(|s| s.packages.as_deref())
            .unwrap_or_default()
    }

    /// Setup script, if any.
    pub fn setup_script(&self) -> Option<&str> {
        self.setup
            .as_ref()
            .and_then(|s| s.setup_script.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Build command, if configured and non-empty.
    pub fn build_cmd(&self) -> Option<&str> {
        self.build.as_ref().map(|b| b.cmd.as_str()).filter(|c| !c.is_empty())
    }
}

/// Parts of the configuration that are reconciled on change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigArea {
    /// `development.languageService`
    LanguageService,
    /// `setup.packages`
    Packages,
    /// `setup.setupScript`
    SetupScript,
    /// `networks`
    Networks,
}

impl ConfigArea {
    /// Dotted path of the area.
    pub fn path(self) -> &'static str {
        match self {
            Self::LanguageService => "development.languageService",
            Self::Packages => "setup.packages",
            Self::SetupScript => "setup.setup_script",
            Self::Networks => "networks",
        }
    }

    fn value(self, config: &WorkbenchConfig) -> Value {
        let value = match self {
            Self::LanguageService => serde_json::to_value(&config.development.language_service),
            Self::Packages => serde_json::to_value(config.setup.as_ref().map(|s| &s.packages)),
            Self::SetupScript => serde_json::to_value(config.setup.as_ref().map(|s| &s.setup_script)),
            Self::Networks => serde_json::to_value(&config.networks),
        };
        value.unwrap_or(Value::Null)
    }
}

/// Reconfigurable areas that differ between `old` and `new`.
pub fn changed_areas(old: &WorkbenchConfig, new: &WorkbenchConfig) -> BTreeSet<ConfigArea> {
    [
        ConfigArea::LanguageService,
        ConfigArea::Packages,
        ConfigArea::SetupScript,
        ConfigArea::Networks,
    ]
    .into_iter()
    .filter(|area| area.value(old) != area.value(new))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
apps:
  web:
    run: python app.py --debug
    cliArgs: [--port, 8080]
    env:
      MODE: dev
services:
  worker:
    run: celery -A tasks worker
    restartPolicy: on-failure
development:
  ignore: |
    *.pyc
    __pycache__
  languageService:
    python: pylsp
    ts:
      cmd: typescript-language-server --stdio
      languages: [typescript, javascript]
setup:
  packages: [ffmpeg]
  setupScript: pip install -r requirements.txt
build:
  cmd: make
  watch: true
  filePatterns: |
    src/*.c
networks: [db]
";

    #[test]
    fn parses_full_document() {
        let c = WorkbenchConfig::from_yaml(SAMPLE).unwrap();
        let web = &c.apps["web"];
        assert_eq!(web.run, "python app.py --debug");
        assert_eq!(web.args(), vec!["--port", "8080"]);
        assert_eq!(c.services["worker"].restart_policy, Some(RestartPolicy::OnFailure));
        assert_eq!(c.services["worker"].app.run, "celery -A tasks worker");
        assert_eq!(c.development.ignore_patterns(), vec!["*.pyc", "__pycache__"]);
        let servers = c.development.language_servers();
        assert_eq!(servers["python"], "pylsp");
        assert_eq!(servers["ts"], "typescript-language-server --stdio");
        assert_eq!(c.packages(), ["ffmpeg".to_string()]);
        assert_eq!(c.build.as_ref().unwrap().patterns(), vec!["src/*.c"]);
        assert_eq!(c.desired_networks(), ["db".to_string()]);
    }

    #[test]
    fn service_restart_policy_defaults_to_always() {
        let c = WorkbenchConfig::from_yaml("services:\n  s:\n    run: x\n").unwrap();
        assert_eq!(c.services["s"].restart_policy, Some(RestartPolicy::Always));
    }

    #[test]
    fn snake_case_aliases_accepted() {
        let c = WorkbenchConfig::from_yaml("setup:\n  setup_script: echo hi\n").unwrap();
        assert_eq!(c.setup_script(), Some("echo hi"));
    }

    #[test]
    fn proxy_accepts_bool_or_public() {
        let c = WorkbenchConfig::from_yaml("apps:\n  a: {run: x, proxy: public}\n  b: {run: y, proxy: true}\n").unwrap();
        assert_eq!(c.apps["a"].proxy, Some(ProxyMode::Public(PublicTag::Public)));
        assert_eq!(c.apps["b"].proxy, Some(ProxyMode::Enabled(true)));
        assert!(WorkbenchConfig::from_yaml("apps:\n  a: {run: x, proxy: sometimes}\n").is_err());
    }

    #[test]
    fn build_requires_cmd() {
        assert!(WorkbenchConfig::from_yaml("build:\n  watch: true\n").is_err());
    }

    #[test]
    fn lookup_prefers_apps() {
        let c = WorkbenchConfig::from_yaml("apps:\n  x: {run: app}\nservices:\n  x: {run: svc}\n  y: {run: only}\n").unwrap();
        assert_eq!(c.app_or_service("x").unwrap().run, "app");
        assert_eq!(c.app_or_service("y").unwrap().run, "only");
        assert!(c.app_or_service("z").is_none());
    }

    #[test]
    fn fallback_has_python_app() {
        let c = WorkbenchConfig::fallback();
        insta::assert_json_snapshot!(c, @r#"
        {
          "apps": {
            "MyApp": {
              "run": "python"
            }
          },
          "services": {},
          "development": {
            "ignore": ""
          }
        }
        "#);
    }

    #[test]
    fn changed_areas_detects_each_area() {
        let old = WorkbenchConfig::from_yaml(SAMPLE).unwrap();
        assert!(changed_areas(&old, &old).is_empty());

        let mut new = old.clone();
        new.networks = Some(vec!["db".into(), "cache".into()]);
        new.setup.as_mut().unwrap().packages = None;
        let areas = changed_areas(&old, &new);
        assert_eq!(
            areas.into_iter().collect::<Vec<_>>(),
            vec![ConfigArea::Packages, ConfigArea::Networks]
        );

        let mut new = old.clone();
        new.apps.clear();
        new.build = None;
        assert!(changed_areas(&old, &new).is_empty());

        let mut new = old.clone();
        let _ = new
            .development
            .language_service
            .as_mut()
            .unwrap()
            .insert("rust".into(), LanguageServiceEntry::Command("rust-analyzer".into()));
        new.setup.as_mut().unwrap().setup_script = Some("true".into());
        let areas: Vec<_> = changed_areas(&old, &new).into_iter().collect();
        assert_eq!(areas, vec![ConfigArea::LanguageService, ConfigArea::SetupScript]);
    }
}
