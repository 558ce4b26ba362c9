//! Environment switch that turns the whole background launch off, for when
//! the server is already running somewhere else.

pub const ENABLED_VAR: &str = "RUNWERK_ENABLED";
/// Older name of [`ENABLED_VAR`]. Still honoured, with a warning.
pub const LEGACY_VAR: &str = "FLASKRUN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleValue {
	Enabled,
	Disabled,
	Unrecognized,
}

/// Interprets one variable. Unset or empty means enabled; otherwise the value
/// is trimmed and compared case-insensitively.
pub fn parse_toggle(raw: Option<&str>) -> ToggleValue {
	let value = match raw {
		None | Some("") => return ToggleValue::Enabled,
		Some(v) => v.trim().to_lowercase(),
	};
	match value.as_str() {
		"0" | "false" => ToggleValue::Disabled,
		"1" | "true" => ToggleValue::Enabled,
		_ => ToggleValue::Unrecognized,
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toggle {
	pub enabled: bool,
	pub warnings: Vec<String>,
}

/// Resolves the switch through `lookup`. Any variable saying "off" disables
/// the launch; unrecognised values are reported and count as "on".
pub fn resolve<F>(lookup: F) -> Toggle
where
	F: Fn(&str) -> Option<String>,
{
	let mut warnings = Vec::new();
	if lookup(LEGACY_VAR).is_some() {
		warnings.push(format!("{} is deprecated, use {} instead", LEGACY_VAR, ENABLED_VAR));
	}

	for var in [LEGACY_VAR, ENABLED_VAR] {
		let raw = lookup(var);
		match parse_toggle(raw.as_deref()) {
			ToggleValue::Disabled => {
				return Toggle {
					enabled: false,
					warnings,
				}
			}
			ToggleValue::Enabled => {}
			ToggleValue::Unrecognized => {
				let value = raw.unwrap_or_default();
				warnings.push(format!("unexpected {} value: {:?}", var, value.trim()));
			}
		}
	}

	Toggle {
		enabled: true,
		warnings,
	}
}

/// Reads the switch from the process environment, logging any warnings.
pub fn enabled() -> bool {
	let toggle = resolve(|var| std::env::var(var).ok());
	for warning in &toggle.warnings {
		tracing::warn!("{}", warning);
	}
	toggle.enabled
}
