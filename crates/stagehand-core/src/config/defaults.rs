//! Default configuration values

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "stagehand.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "stagehand.yaml";

/// Project-local directory for downloaded tools, relative to the project root
pub const DEFAULT_TOOLS_DIR: &str = ".stagehand/bin";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".stagehand.toml",
        ".stagehand.yaml",
    ]
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Stagehand configuration

[runner]
mirror_output = true
cancel_grace_secs = 5
concurrency = "serialize"

[tools]
cache_dir = ".stagehand/bin"

# [tools.overrides]
# mc = "/usr/local/bin/mc"

[tasks.hello]
description = "Print a greeting"
process = ["echo hello"]
"#;
