use std::collections::BTreeMap;
use std::path::PathBuf;

/// Variable the child interpreter searches for importable modules.
pub const SEARCH_PATH_VAR: &str = "PYTHONPATH";

#[derive(Debug, thiserror::Error)]
pub enum EnvError {
	#[error("more than one value found for case-insensitive key {key}: {values:?}")]
	ConflictingKeys { key: String, values: Vec<String> },
}

/// Looks up `key` ignoring ASCII case.
///
/// Several casings of the key are fine as long as they agree on the value;
/// differing values are a configuration error.
pub fn get_case_insensitive(
	vars: &BTreeMap<String, String>,
	key: &str,
) -> Result<Option<String>, EnvError> {
	let mut values: Vec<&str> = vars
		.iter()
		.filter(|(k, _)| k.eq_ignore_ascii_case(key))
		.map(|(_, v)| v.as_str())
		.collect();
	values.sort_unstable();
	values.dedup();

	match values.as_slice() {
		[] => Ok(None),
		[value] => Ok(Some(value.to_string())),
		_ => Err(EnvError::ConflictingKeys {
			key: key.to_string(),
			values: values.iter().map(|v| v.to_string()).collect(),
		}),
	}
}

/// Separator between entries of `PATH`-like variables.
pub fn search_path_separator() -> char {
	if cfg!(windows) {
		';'
	} else {
		':'
	}
}

pub fn join_search_path(paths: &[PathBuf]) -> String {
	let separator = search_path_separator().to_string();
	paths
		.iter()
		.map(|p| p.to_string_lossy().into_owned())
		.collect::<Vec<_>>()
		.join(&separator)
}

/// The caller's module search path: the working directory, then whatever the
/// inherited `PYTHONPATH` lists.
pub fn current_search_path() -> Vec<PathBuf> {
	let mut paths = Vec::new();
	if let Ok(cwd) = std::env::current_dir() {
		paths.push(cwd);
	}
	if let Some(inherited) = std::env::var_os(SEARCH_PATH_VAR) {
		paths.extend(std::env::split_paths(&inherited).filter(|p| !p.as_os_str().is_empty()));
	}
	paths
}

/// Makes sure the overrides carry a `PYTHONPATH`.
///
/// A value the caller already set (under any casing) is kept; otherwise
/// `current` is joined into one.
pub fn apply_search_path(
	overrides: &mut BTreeMap<String, String>,
	current: &[PathBuf],
) -> Result<(), EnvError> {
	let value = match get_case_insensitive(overrides, SEARCH_PATH_VAR)? {
		Some(value) => value,
		None => join_search_path(current),
	};
	overrides.insert(SEARCH_PATH_VAR.to_string(), value);
	Ok(())
}
