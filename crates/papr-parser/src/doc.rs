//! The suite document: raw merge semantics, canonicalization, and
//! schema validation described in SPEC_FULL.md §3-4.1.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{ordinal, ParseError, Result};

fn mget<'a>(m: &'a Mapping, key: &str) -> Option<&'a Value> {
    m.get(&Value::from(key))
}

fn mcontains(m: &Mapping, key: &str) -> bool {
    m.contains_key(&Value::from(key))
}

fn mremove(m: &mut Mapping, key: &str) -> Option<Value> {
    m.remove(&Value::from(key))
}

fn minsert(m: &mut Mapping, key: &str, v: Value) {
    m.insert(Value::from(key), v);
}

const DEFAULT_CONTEXT: &str = "Red Hat CI";
const RESERVED_CONTEXT: &str = "required";
const ENV_SELECTOR_KEYS: [&str; 3] = ["container", "host", "cluster"];
const MAX_TIMEOUT_SECS: u32 = 7200;
const DEFAULT_TIMEOUT: &str = "2h";

/// One environment selector, always exactly one per canonical suite.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvSelector {
    Container {
        image: String,
    },
    Host {
        distro: String,
        specs: HostSpecs,
        ostree: Option<OstreeSpec>,
    },
    Cluster {
        hosts: Vec<HostSpec>,
        container: Option<ContainerSpec>,
    },
}

impl EnvSelector {
    pub fn kind_name(&self) -> &'static str {
        match self {
            EnvSelector::Container { .. } => "container",
            EnvSelector::Host { .. } => "host",
            EnvSelector::Cluster { .. } => "cluster",
        }
    }

    /// Whether this env involves running the suite inside a container
    /// (either directly or as the cluster's controller), matching the
    /// original `is_container_controlled` predicate.
    pub fn is_container_controlled(&self) -> bool {
        match self {
            EnvSelector::Container { .. } => true,
            EnvSelector::Cluster { container, .. } => container.is_some(),
            EnvSelector::Host { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSpecs {
    #[serde(default = "default_ram")]
    pub ram: u32,
    #[serde(default = "default_cpus")]
    pub cpus: u32,
    #[serde(default = "default_disk")]
    pub disk: u32,
    #[serde(default, rename = "secondary-disk")]
    pub secondary_disk: u32,
}

fn default_ram() -> u32 {
    2048
}
fn default_cpus() -> u32 {
    1
}
fn default_disk() -> u32 {
    20
}

impl Default for HostSpecs {
    fn default() -> Self {
        HostSpecs {
            ram: default_ram(),
            cpus: default_cpus(),
            disk: default_disk(),
            secondary_disk: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSpec {
    pub name: String,
    pub distro: String,
    #[serde(default)]
    pub specs: HostSpecs,
    #[serde(default)]
    pub ostree: Option<OstreeSpec>,
}

/// `ostree: "latest"` or `ostree: {remote, branch, revision}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OstreeSpec {
    Latest(String),
    Pinned {
        #[serde(default)]
        remote: String,
        #[serde(default)]
        branch: String,
        #[serde(default)]
        revision: String,
    },
}

/// `build: true` or `build: {config-opts, build-opts, install-opts}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildDirective {
    Enabled(bool),
    WithOpts {
        #[serde(default, rename = "config-opts")]
        config_opts: String,
        #[serde(default, rename = "build-opts")]
        build_opts: String,
        #[serde(default, rename = "install-opts")]
        install_opts: String,
    },
}

impl BuildDirective {
    pub fn opts(&self) -> (String, String, String) {
        match self {
            BuildDirective::Enabled(_) => (String::new(), String::new(), String::new()),
            BuildDirective::WithOpts {
                config_opts,
                build_opts,
                install_opts,
            } => (config_opts.clone(), build_opts.clone(), install_opts.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraRepo {
    pub name: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

/// A fully merged, schema-validated suite ready to be executed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalSuite {
    pub context: String,
    pub env: EnvSelector,
    pub tests: Vec<String>,
    pub build: Option<BuildDirective>,
    pub branches: Vec<String>,
    pub pulls: bool,
    pub timeout_secs: u32,
    pub env_vars: BTreeMap<String, String>,
    pub artifacts: Vec<String>,
    pub required: bool,
    pub extra_repos: Vec<ExtraRepo>,
    pub packages: Vec<String>,
}

impl CanonicalSuite {
    pub fn uses_build_api(&self) -> bool {
        self.build.is_some()
    }
}

/// Parses a suite document stream and yields [`CanonicalSuite`]s.
pub struct SuiteParser {
    raw_docs: Vec<Value>,
}

impl SuiteParser {
    /// Reads every YAML document in `contents` eagerly, surfacing any
    /// syntax error up front (SPEC_FULL.md §4.1 step 2).
    pub fn from_str(contents: &str) -> Result<Self> {
        let raw_docs: std::result::Result<Vec<Value>, _> =
            serde_yaml::Deserializer::from_str(contents)
                .map(Value::deserialize)
                .collect();
        let raw_docs = raw_docs.map_err(|e| {
            ParseError::MalformedInput(format!("file could not be parsed as valid YAML: {e}"))
        })?;
        Ok(Self { raw_docs })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ParseError::MalformedInput("file is not valid UTF-8".to_string()))?;
        Self::from_str(text)
    }

    /// Runs the full merge/normalize/validate pipeline over every document
    /// and returns the ordered list of canonical suites.
    pub fn parse(&self) -> Result<Vec<CanonicalSuite>> {
        let mut prev_merged: Option<Mapping> = None;
        let mut contexts_seen = HashSet::new();
        let mut merged_mappings = Vec::with_capacity(self.raw_docs.len());

        for (idx, raw) in self.raw_docs.iter().enumerate() {
            let merged = Self::merge_one(idx, raw, prev_merged.as_ref())
                .map_err(|e| wrap_ordinal(idx, e))?;

            let context = mget(&merged, "context")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if contexts_seen.contains(&context) {
                return Err(wrap_ordinal(
                    idx,
                    ParseError::SchemaViolation("duplicate 'context' value detected".to_string()),
                ));
            }
            contexts_seen.insert(context);

            merged_mappings.push(merged.clone());
            prev_merged = Some(merged);
        }

        // Reserved-name check as a deterministic post-pass over the whole
        // sequence (see DESIGN.md Open Question decisions), rather than
        // interleaved with the per-document loop above.
        let met_required = merged_mappings.iter().any(|m| {
            mget(m, "required")
                .and_then(Value::as_bool)
                .unwrap_or(false)
        });
        if met_required {
            for (idx, m) in merged_mappings.iter().enumerate() {
                let context = mget(m, "context")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if context == RESERVED_CONTEXT {
                    return Err(wrap_ordinal(
                        idx,
                        ParseError::SchemaViolation(
                            "context \"required\" forbidden when using the 'required' key"
                                .to_string(),
                        ),
                    ));
                }
            }
        }

        merged_mappings
            .into_iter()
            .enumerate()
            .map(|(idx, m)| canonicalize(&m).map_err(|e| wrap_ordinal(idx, e)))
            .collect()
    }

    /// Merges raw document `idx` with the previously merged document
    /// (per the `inherit` rule) and normalizes the result, but does not
    /// yet convert it into a strongly-typed [`CanonicalSuite`].
    fn merge_one(idx: usize, raw: &Value, prev: Option<&Mapping>) -> Result<Mapping> {
        let new = raw
            .as_mapping()
            .ok_or_else(|| ParseError::SchemaViolation("top-level type should be a dict".to_string()))?
            .clone();

        let mut new = new;
        if idx == 0 && !mcontains(&new, "context") {
            minsert(&mut new, "context", Value::from(DEFAULT_CONTEXT));
        }

        if let Some(v) = mget(&new, "inherit") {
            if !v.is_bool() {
                return Err(ParseError::SchemaViolation(
                    "expected 'bool' value for 'inherit' key".to_string(),
                ));
            }
        }

        let inherit = mget(&new, "inherit")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let merged = if prev.is_none() || !inherit {
            new
        } else {
            let mut base = prev.unwrap().clone();
            let new_has_selector = ENV_SELECTOR_KEYS.iter().any(|k| mcontains(&new, k));
            if new_has_selector {
                for k in ENV_SELECTOR_KEYS {
                    mremove(&mut base, k);
                }
            }
            mremove(&mut base, "context");
            for (k, v) in new.iter() {
                base.insert(k.clone(), v.clone());
            }
            base
        };

        Ok(normalize(merged))
    }
}

/// Strips the `inherit` key and any null-valued keys.
fn normalize(mut m: Mapping) -> Mapping {
    mremove(&mut m, "inherit");
    let null_keys: Vec<Value> = m
        .iter()
        .filter(|(_, v)| v.is_null())
        .map(|(k, _)| k.clone())
        .collect();
    for k in null_keys {
        m.remove(&k);
    }
    m
}

fn wrap_ordinal(idx: usize, e: ParseError) -> ParseError {
    ParseError::InSuite {
        ordinal: ordinal(idx + 1),
        source: Box::new(e),
    }
}

/// Every key a suite document is allowed to carry once merged. `inherit`
/// is deliberately absent: `normalize` strips it before `canonicalize` ever
/// sees the mapping.
const RECOGNIZED_KEYS: [&str; 14] = [
    "context",
    "container",
    "host",
    "cluster",
    "tests",
    "build",
    "branches",
    "pulls",
    "timeout",
    "env",
    "artifacts",
    "required",
    "extra-repos",
    "packages",
];

/// Rejects any key the schema doesn't recognize, matching the original's
/// `pykwalify`-enforced closed schema (`ext_schema.py`).
fn check_closed_schema(m: &Mapping) -> Result<()> {
    for (key, _) in m.iter() {
        let Some(key) = key.as_str() else {
            return Err(ParseError::SchemaViolation(
                "suite keys must be strings".to_string(),
            ));
        };
        if !RECOGNIZED_KEYS.contains(&key) {
            return Err(ParseError::SchemaViolation(format!(
                "unrecognized key {key:?}"
            )));
        }
    }
    Ok(())
}

fn canonicalize(m: &Mapping) -> Result<CanonicalSuite> {
    check_closed_schema(m)?;

    let context = mget(m, "context")
        .and_then(Value::as_str)
        .ok_or_else(|| ParseError::SchemaViolation("missing 'context' key".to_string()))?
        .to_string();

    let env = parse_env_selector(m)?;

    let tests: Vec<String> = match mget(m, "tests") {
        Some(v) => from_value(v, "tests")?,
        None => Vec::new(),
    };

    let build: Option<BuildDirective> = match mget(m, "build") {
        Some(v) => Some(from_value(v, "build")?),
        None => None,
    };

    if tests.is_empty() && build.is_none() {
        return Err(ParseError::SchemaViolation(
            "suite must declare at least one of 'tests' or 'build'".to_string(),
        ));
    }

    let branches: Vec<String> = match mget(m, "branches") {
        Some(v) => from_value(v, "branches")?,
        None => vec!["master".to_string()],
    };

    let pulls = mget(m, "pulls").and_then(Value::as_bool).unwrap_or(true);

    let timeout_str = mget(m, "timeout")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_TIMEOUT);
    let timeout_secs = parse_timeout(timeout_str)?;

    let env_vars: BTreeMap<String, String> = match mget(m, "env") {
        Some(v) => from_value(v, "env")?,
        None => BTreeMap::new(),
    };

    let artifacts: Vec<String> = match mget(m, "artifacts") {
        Some(v) => from_value(v, "artifacts")?,
        None => Vec::new(),
    };

    let required = mget(m, "required")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let extra_repos: Vec<ExtraRepo> = match mget(m, "extra-repos") {
        Some(v) => from_value(v, "extra-repos")?,
        None => Vec::new(),
    };

    let packages: Vec<String> = match mget(m, "packages") {
        Some(v) => from_value(v, "packages")?,
        None => Vec::new(),
    };

    Ok(CanonicalSuite {
        context,
        env,
        tests,
        build,
        branches,
        pulls,
        timeout_secs,
        env_vars,
        artifacts,
        required,
        extra_repos,
        packages,
    })
}

fn from_value<T: for<'de> Deserialize<'de>>(v: &Value, field: &str) -> Result<T> {
    serde_yaml::from_value(v.clone())
        .map_err(|e| ParseError::SchemaViolation(format!("invalid '{field}' field: {e}")))
}

fn parse_env_selector(m: &Mapping) -> Result<EnvSelector> {
    let present: Vec<&str> = ENV_SELECTOR_KEYS
        .iter()
        .copied()
        .filter(|k| mcontains(m, k))
        .collect();

    match present.len() {
        0 => Err(ParseError::SchemaViolation(
            "suite must declare exactly one of 'container', 'host', 'cluster'".to_string(),
        )),
        1 => {
            let key = present[0];
            let v = mget(m, key).unwrap();
            match key {
                "container" => {
                    let spec: ContainerSpec = from_value(v, "container")?;
                    Ok(EnvSelector::Container { image: spec.image })
                }
                "host" => {
                    let spec: HostSpec0 = from_value(v, "host")?;
                    Ok(EnvSelector::Host {
                        distro: spec.distro,
                        specs: spec.specs,
                        ostree: spec.ostree,
                    })
                }
                "cluster" => {
                    let spec: ClusterSpec = from_value(v, "cluster")?;
                    if spec.hosts.is_empty() {
                        return Err(ParseError::SchemaViolation(
                            "'cluster' must declare at least one host".to_string(),
                        ));
                    }
                    Ok(EnvSelector::Cluster {
                        hosts: spec.hosts,
                        container: spec.container,
                    })
                }
                _ => unreachable!(),
            }
        }
        _ => Err(ParseError::SchemaViolation(format!(
            "suite declares multiple environment selectors: {}",
            present.join(", ")
        ))),
    }
}

#[derive(Deserialize)]
struct HostSpec0 {
    distro: String,
    #[serde(default)]
    specs: HostSpecs,
    #[serde(default)]
    ostree: Option<OstreeSpec>,
}

#[derive(Deserialize)]
struct ClusterSpec {
    hosts: Vec<HostSpec>,
    #[serde(default)]
    container: Option<ContainerSpec>,
}

/// Parses a `^[0-9]+[smh]$` timeout string into seconds, enforcing the
/// 2-hour upper bound from SPEC_FULL.md §3.
fn parse_timeout(s: &str) -> Result<u32> {
    let re = regex::Regex::new(r"^([0-9]+)([smh])$").unwrap();
    let caps = re
        .captures(s)
        .ok_or_else(|| ParseError::SchemaViolation(format!("invalid timeout string: {s:?}")))?;
    let n: u32 = caps[1]
        .parse()
        .map_err(|_| ParseError::SchemaViolation(format!("timeout value out of range: {s:?}")))?;
    let secs = match &caps[2] {
        "s" => n,
        "m" => n.saturating_mul(60),
        "h" => n.saturating_mul(3600),
        _ => unreachable!(),
    };
    if secs == 0 || secs > MAX_TIMEOUT_SECS {
        return Err(ParseError::SchemaViolation(format!(
            "timeout {secs}s out of allowed range (1..={MAX_TIMEOUT_SECS})"
        )));
    }
    Ok(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<Vec<CanonicalSuite>> {
        SuiteParser::from_str(yaml)?.parse()
    }

    #[test]
    fn single_doc_defaults_context() {
        let suites = parse(
            "container: {image: fedora}\ntests: [\"true\"]\n",
        )
        .unwrap();
        assert_eq!(suites.len(), 1);
        assert_eq!(suites[0].context, DEFAULT_CONTEXT);
        assert_eq!(suites[0].pulls, true);
        assert_eq!(suites[0].branches, vec!["master".to_string()]);
        assert_eq!(suites[0].timeout_secs, 2 * 3600);
    }

    #[test]
    fn second_doc_requires_context() {
        let yaml = "context: a\ncontainer: {image: x}\ntests: [\"true\"]\n---\ncontainer: {image: y}\ntests: [\"true\"]\n";
        let err = parse(yaml).unwrap_err();
        assert!(matches!(err, ParseError::InSuite { .. }));
    }

    #[test]
    fn duplicate_context_rejected() {
        let yaml = "context: a\ncontainer: {image: x}\ntests: [\"true\"]\n---\ncontext: a\ncontainer: {image: y}\ntests: [\"true\"]\n";
        let err = parse(yaml).unwrap_err();
        assert!(err.to_string().contains("2nd"));
    }

    #[test]
    fn inherit_drops_old_env_selector() {
        let yaml = "context: a\ncontainer: {image: x}\ntests: [\"true\"]\n---\ncontext: b\ninherit: true\nhost: {distro: fedora}\n";
        let suites = parse(yaml).unwrap();
        assert_eq!(suites.len(), 2);
        assert_eq!(suites[0].context, "a");
        assert!(matches!(suites[0].env, EnvSelector::Container { .. }));
        assert_eq!(suites[1].context, "b");
        assert!(matches!(suites[1].env, EnvSelector::Host { .. }));
        assert_eq!(suites[1].tests, suites[0].tests);
    }

    #[test]
    fn inherit_without_new_selector_keeps_old() {
        let yaml = "context: a\ncontainer: {image: x}\ntests: [\"true\"]\n---\ncontext: b\ninherit: true\ntests: [\"false\"]\n";
        let suites = parse(yaml).unwrap();
        assert!(matches!(suites[1].env, EnvSelector::Container { .. }));
        assert_eq!(suites[1].tests, vec!["false".to_string()]);
    }

    #[test]
    fn reserved_context_rejected_when_required_seen() {
        let yaml = "context: a\ncontainer: {image: x}\ntests: [\"true\"]\nrequired: true\n---\ncontext: required\ncontainer: {image: y}\ntests: [\"true\"]\n";
        let err = parse(yaml).unwrap_err();
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn reserved_context_allowed_without_required_flag() {
        let yaml = "context: required\ncontainer: {image: y}\ntests: [\"true\"]\n";
        assert!(parse(yaml).is_ok());
    }

    #[test]
    fn timeout_upper_bound_enforced() {
        let yaml = "context: a\ncontainer: {image: x}\ntests: [\"true\"]\ntimeout: \"3h\"\n";
        let err = parse(yaml).unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn requires_tests_or_build() {
        let yaml = "context: a\ncontainer: {image: x}\n";
        assert!(parse(yaml).is_err());
    }

    #[test]
    fn unrecognized_key_rejected() {
        let yaml = "context: a\ncontainer: {image: x}\ntests: [\"true\"]\nbogus: 1\n";
        let err = parse(yaml).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn malformed_yaml_is_malformed_input() {
        let err = SuiteParser::from_str("not: [valid\n").unwrap_err();
        assert!(matches!(err, ParseError::MalformedInput(_)));
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut m = Mapping::new();
        m.insert(Value::from("context"), Value::from("a"));
        m.insert(Value::from("inherit"), Value::from(true));
        m.insert(Value::from("foo"), Value::Null);
        let once = normalize(m.clone());
        let twice = normalize(once.clone());
        assert_eq!(once, twice);
    }
}
