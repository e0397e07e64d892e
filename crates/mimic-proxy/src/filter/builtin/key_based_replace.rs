//! Rewrite responses with values looked up by a key found in the request.
//!
//! Every group configures:
//!
//! - `mapping_file` - CSV lines of `key,value1,value2,...`
//! - `key` - regex locating the key in the request path, query, header or
//!   content, tried in that order. With more than one capture group the key
//!   is the group named `key`.
//! - `replace*` - regexes over the response code, header and content. The
//!   text captured by group `v1` is replaced with the first value, `v2` with
//!   the second and so on.

use super::{setting_str, KEY_BASED_REPLACE};
use crate::config::{FilterConfig, FilterGroupConfig};
use crate::filter::{Filter, FilterFactory};
use crate::message::{Request, Response};
use anyhow::Context;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Mapping {
    values: HashMap<String, Vec<String>>,
    key: Regex,
    replace: Vec<Regex>,
}

impl Mapping {
    fn from_group(group: &FilterGroupConfig) -> anyhow::Result<Self> {
        let file = setting_str(group, "mapping_file").context("'mapping_file' is required")?;
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("Unable to read mapping file '{file}'"))?;
        let key = setting_str(group, "key").context("'key' is required")?;
        let key = Regex::new(key).with_context(|| format!("Invalid 'key' regex '{key}'"))?;

        let mut replace = Vec::new();
        for (name, value) in group.config.iter().filter(|(name, _)| name.starts_with("replace")) {
            let source = value
                .as_str()
                .with_context(|| format!("'{name}' must be a string"))?;
            replace.push(Regex::new(source).with_context(|| format!("Invalid '{name}' regex"))?);
        }

        Ok(Self {
            values: parse_mapping(&text),
            key,
            replace,
        })
    }

    fn find_key(&self, request: &Request) -> Option<String> {
        let wanted = if self.key.captures_len() > 2 { Some("key") } else { None };
        [
            ("path", &request.path),
            ("query", &request.query),
            ("header", &request.header),
            ("content", &request.content),
        ]
        .into_iter()
        .find_map(|(place, text)| {
            let captures = self.key.captures(text)?;
            let found = match wanted {
                Some(name) => captures.name(name),
                None => captures.get(self.key.captures_len() - 1),
            }?;
            debug!("Found key '{}' in request {}", found.as_str(), place);
            Some(found.as_str().to_string())
        })
    }
}

/// Later lines win over earlier ones with the same key.
fn parse_mapping(text: &str) -> HashMap<String, Vec<String>> {
    let mut values = HashMap::new();
    for line in text.lines().filter(|line| !line.is_empty()) {
        let mut columns = line.split(',');
        let Some(key) = columns.next() else {
            continue;
        };
        if values
            .insert(key.to_string(), columns.map(str::to_string).collect())
            .is_some()
        {
            warn!("{}: duplicate key in mapping file: {}", KEY_BASED_REPLACE, key);
        }
    }
    values
}

/// Replace each `vN` capture of `regex` in `text` with `values[N - 1]`.
fn replace_values(text: &str, regex: &Regex, values: &[String]) -> String {
    let mut tokens: Vec<(usize, usize, &str)> = Vec::new();
    for captures in regex.captures_iter(text) {
        for (index, value) in values.iter().enumerate() {
            if let Some(found) = captures.name(&format!("v{}", index + 1)) {
                tokens.push((found.start(), found.end(), value.as_str()));
            }
        }
    }
    tokens.sort_by_key(|(start, _, _)| *start);

    let mut out = String::with_capacity(text.len());
    let mut last_end = 0;
    for (start, end, value) in tokens {
        if start < last_end {
            continue;
        }
        out.push_str(&text[last_end..start]);
        out.push_str(value);
        last_end = end;
    }
    out.push_str(&text[last_end..]);
    out
}

/// Mappings by group, `None` being the default group.
#[derive(Debug, Clone, Default)]
pub struct KeyBasedReplaceFactory {
    mappings: Arc<HashMap<Option<String>, Mapping>>,
}

impl KeyBasedReplaceFactory {
    /// Groups that cannot be loaded are logged and left out.
    pub fn from_config(config: &FilterConfig) -> Self {
        let groups = std::iter::once((None, &config.default))
            .chain(config.groups.iter().map(|(name, group)| (Some(name.clone()), group)));
        let mut mappings = HashMap::new();
        for (name, group) in groups {
            if name.is_none() && group.config.is_empty() {
                continue;
            }
            match Mapping::from_group(group) {
                Ok(mapping) => {
                    mappings.insert(name, mapping);
                }
                Err(e) => warn!(
                    "{}: group {} will not replace anything: {:#}",
                    KEY_BASED_REPLACE,
                    name.as_deref().unwrap_or("default"),
                    e
                ),
            }
        }
        Self {
            mappings: Arc::new(mappings),
        }
    }
}

impl FilterFactory for KeyBasedReplaceFactory {
    fn name(&self) -> &str {
        KEY_BASED_REPLACE
    }

    fn create(&self) -> Box<dyn Filter> {
        Box::new(KeyBasedReplace {
            mappings: self.mappings.clone(),
            key: None,
        })
    }
}

#[derive(Debug)]
pub struct KeyBasedReplace {
    mappings: Arc<HashMap<Option<String>, Mapping>>,
    key: Option<String>,
}

impl KeyBasedReplace {
    fn mapping(&self, group: Option<&str>) -> Option<&Mapping> {
        self.mappings.get(&group.map(str::to_string))
    }
}

impl Filter for KeyBasedReplace {
    fn client_request(&mut self, request: &mut Request, group: Option<&str>) -> anyhow::Result<()> {
        self.key = self.mapping(group).and_then(|mapping| mapping.find_key(request));
        Ok(())
    }

    fn client_response(&mut self, response: &mut Response, group: Option<&str>) -> anyhow::Result<()> {
        let Some(mapping) = self.mapping(group) else {
            return Ok(());
        };
        let Some(key) = &self.key else {
            debug!("No key found in request, nothing replaced");
            return Ok(());
        };
        let Some(values) = mapping.values.get(key) else {
            warn!("{}: key '{}' does not exist in mapping file", KEY_BASED_REPLACE, key);
            return Ok(());
        };
        for regex in &mapping.replace {
            response.code = replace_values(&response.code, regex, values);
            response.header = replace_values(&response.header, regex, values);
            response.content = replace_values(&response.content, regex, values);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn mapping_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn group(file: &NamedTempFile, settings: &[(&str, &str)]) -> FilterGroupConfig {
        let mut config: BTreeMap<String, serde_yaml::Value> = settings
            .iter()
            .map(|(key, value)| (key.to_string(), (*value).into()))
            .collect();
        config.insert(
            "mapping_file".to_string(),
            file.path().to_str().unwrap().into(),
        );
        FilterGroupConfig {
            config,
            ..FilterGroupConfig::default()
        }
    }

    fn config(default: FilterGroupConfig, groups: Vec<(&str, FilterGroupConfig)>) -> FilterConfig {
        FilterConfig {
            name: KEY_BASED_REPLACE.to_string(),
            enabled: true,
            default,
            groups: groups
                .into_iter()
                .map(|(name, group)| (name.to_string(), group))
                .collect(),
        }
    }

    #[test]
    fn test_key_from_path_replaces_response_values() {
        let file = mapping_file("1001,Alice,Oslo\n1002,Bob,Bergen\n");
        let factory = KeyBasedReplaceFactory::from_config(&config(
            FilterGroupConfig::default(),
            vec![(
                "customers",
                group(
                    &file,
                    &[
                        ("key", r"/customers/(\d+)"),
                        ("replace_name", r#""name":"(?P<v1>[^"]*)","city":"(?P<v2>[^"]*)""#),
                    ],
                ),
            )],
        ));
        let mut filter = factory.create();

        let mut request = Request::builder().path("/customers/1002").build();
        filter.client_request(&mut request, Some("customers")).unwrap();
        let mut response = Response::new("200", "", r#"{"name":"X","city":"Y"}"#);
        filter.client_response(&mut response, Some("customers")).unwrap();
        assert_eq!(response.content, r#"{"name":"Bob","city":"Bergen"}"#);
    }

    #[test]
    fn test_named_key_group_from_query() {
        let file = mapping_file("abc,42\n");
        let factory = KeyBasedReplaceFactory::from_config(&config(
            group(
                &file,
                &[
                    ("key", r"(user|account)=(?P<key>\w+)"),
                    ("replace", r"balance=(?P<v1>\d+)"),
                ],
            ),
            vec![],
        ));
        let mut filter = factory.create();

        let mut request = Request::builder().query("account=abc").build();
        filter.client_request(&mut request, None).unwrap();
        let mut response = Response::new("200", "X-Balance: balance=7", "balance=7;balance=8");
        filter.client_response(&mut response, None).unwrap();
        assert_eq!(response.header, "X-Balance: balance=42");
        assert_eq!(response.content, "balance=42;balance=42");
    }

    #[test]
    fn test_unknown_key_leaves_response() {
        let file = mapping_file("1001,Alice\n");
        let factory = KeyBasedReplaceFactory::from_config(&config(
            group(&file, &[("key", r"id=(\d+)"), ("replace", "(?P<v1>.+)")]),
            vec![],
        ));
        let mut filter = factory.create();

        let mut request = Request::builder().query("id=7").build();
        filter.client_request(&mut request, None).unwrap();
        let mut response = Response::new("200", "", "unchanged");
        filter.client_response(&mut response, None).unwrap();
        assert_eq!(response.content, "unchanged");
    }

    #[test]
    fn test_missing_mapping_file_skips_group() {
        let factory = KeyBasedReplaceFactory::from_config(&config(
            FilterGroupConfig {
                config: [
                    ("mapping_file".to_string(), "/nonexistent/map.csv".into()),
                    ("key".to_string(), "x".into()),
                ]
                .into_iter()
                .collect(),
                ..FilterGroupConfig::default()
            },
            vec![],
        ));
        assert!(factory.mappings.is_empty());
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        let values = parse_mapping("a,1\nb,2\na,3\n");
        assert_eq!(values["a"], vec!["3".to_string()]);
        assert_eq!(values["b"], vec!["2".to_string()]);
    }
}
