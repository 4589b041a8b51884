//! Environment-variable overrides.
//!
//! A handful of renderer knobs can be tweaked from the environment without touching code,
//! mainly to pin down driver issues in the field. Unparseable values are ignored with a
//! warning rather than failing startup.

use std::env;

use log::warn;

/// Read `name` as a `usize`, falling back to `default` when unset or malformed.
pub(crate) fn usize_var(name: &str, default: usize) -> usize {
  opt_usize_var(name).unwrap_or(default)
}

/// Read `name` as a `usize`, `None` when unset or malformed.
pub(crate) fn opt_usize_var(name: &str) -> Option<usize> {
  let raw = env::var(name).ok()?;

  match raw.trim().parse() {
    Ok(value) => Some(value),
    Err(_) => {
      warn!("ignoring {}={:?}: not a number", name, raw);
      None
    }
  }
}

/// Read `name` as a boolean, `None` when unset or malformed. Accepts `1`/`0`, `true`/`false`,
/// `yes`/`no` and `on`/`off`, case-insensitively.
pub(crate) fn opt_bool_var(name: &str) -> Option<bool> {
  let raw = env::var(name).ok()?;

  match raw.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Some(true),
    "0" | "false" | "no" | "off" => Some(false),
    _ => {
      warn!("ignoring {}={:?}: not a boolean", name, raw);
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // Process-global environment; use names no other test touches.

  #[test]
  fn numbers_parse_with_fallback() {
    env::set_var("GLAZE_TEST_USIZE", "24");
    assert_eq!(usize_var("GLAZE_TEST_USIZE", 7), 24);

    env::set_var("GLAZE_TEST_USIZE_BAD", "many");
    assert_eq!(usize_var("GLAZE_TEST_USIZE_BAD", 7), 7);

    assert_eq!(usize_var("GLAZE_TEST_USIZE_UNSET", 7), 7);
  }

  #[test]
  fn booleans_accept_common_spellings() {
    env::set_var("GLAZE_TEST_BOOL_ON", "Yes");
    env::set_var("GLAZE_TEST_BOOL_OFF", "0");
    env::set_var("GLAZE_TEST_BOOL_BAD", "maybe");

    assert_eq!(opt_bool_var("GLAZE_TEST_BOOL_ON"), Some(true));
    assert_eq!(opt_bool_var("GLAZE_TEST_BOOL_OFF"), Some(false));
    assert_eq!(opt_bool_var("GLAZE_TEST_BOOL_BAD"), None);
    assert_eq!(opt_bool_var("GLAZE_TEST_BOOL_UNSET"), None);
  }
}
