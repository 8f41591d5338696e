use std::collections::HashMap;

pub const DEBUG_OPTION: &str = "debug";
pub const VERIFY_OPTION: &str = "verify";

/// Processor options as passed with `-A<key>[=<value>]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorOptions {
    /// Emit notes for every round and every generated creator.
    pub debug: bool,
    /// Reject providers that are not subtypes of their interface.
    pub verify: bool,
}

impl ProcessorOptions {
    /// `debug` is on whenever the key is present; `verify` only for a value
    /// of `true`, in any case.
    pub fn from_map(options: &HashMap<String, String>) -> Self {
        Self {
            debug: options.contains_key(DEBUG_OPTION),
            verify: options
                .get(VERIFY_OPTION)
                .is_some_and(|value| value.eq_ignore_ascii_case("true")),
        }
    }

    /// Parses `key=value` and bare `key` arguments.
    pub fn parse<'a>(args: impl IntoIterator<Item = &'a str>) -> Self {
        let options = args
            .into_iter()
            .map(|arg| match arg.split_once('=') {
                Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
                None => (arg.trim().to_string(), String::new()),
            })
            .collect();
        Self::from_map(&options)
    }
}
