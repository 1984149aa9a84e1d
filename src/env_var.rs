use std::sync::OnceLock;

use serde::Deserialize;

fn default_group_size() -> usize {
    8
}

fn default_backend() -> String {
    "local".to_owned()
}

fn default_strategy() -> String {
    "tree".to_owned()
}

fn default_branch() -> usize {
    8
}

/// Any value other than empty, `0`, `false`, `no` or `off` turns a switch on
fn deserialize_switch<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let val = String::deserialize(deserializer)?;
    Ok(!matches!(
        val.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    ))
}

fn default_pause_us() -> u64 {
    1000
}

fn default_pause_max_us() -> u64 {
    1000
}

fn default_backoff_factor() -> u32 {
    2
}

fn default_deadlock_timeout() -> f64 {
    600.0
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// Number of PEs in each leaf (level 0) group, default: 8
    #[serde(default = "default_group_size")]
    pub group_size: usize,

    /// Upper bound on the number of tree levels. When unset the level count is
    /// derived from the number of PEs and the group size.
    pub max_levels: Option<usize>,

    /// The fabric backend to use
    /// local -- all PEs are threads of a single process (single PE when run standalone)
    /// shmem -- one process per PE on a single node
    #[serde(default = "default_backend")]
    pub backend: String,

    /// The detection strategy
    /// tree -- dynamic leaders elected by atomic arrival counters (default)
    /// static_tree -- fixed group owners poll their members and children
    /// star -- group anchors collect member flags, the root collects anchors and broadcasts
    /// hstar -- multi-level star with a tree broadcast back down
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Children per group above the leaves for the hstar strategy, default: 8 (minimum 2)
    #[serde(default = "default_branch")]
    pub branch_k: usize,

    /// Initial pause between polls in microseconds, default: 1000
    #[serde(default = "default_pause_us")]
    pub pause_us: u64,

    /// Largest pause between polls in microseconds, default: 1000
    #[serde(default = "default_pause_max_us")]
    pub pause_max_us: u64,

    /// Growth factor applied to the pause after every unsuccessful poll, default: 2
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,

    /// Seconds a polling loop may spin before a potential deadlock is reported, default: 600.0
    #[serde(default = "default_deadlock_timeout")]
    pub deadlock_timeout: f64,

    /// Emit per-PE leader election and exit messages
    #[serde(default, deserialize_with = "deserialize_switch")]
    pub debug: bool,

    /// Upper bound (ms) of the simulated local work performed by the `global_done` binary
    #[serde(default)]
    pub work_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            group_size: default_group_size(),
            max_levels: None,
            backend: default_backend(),
            strategy: default_strategy(),
            branch_k: default_branch(),
            pause_us: default_pause_us(),
            pause_max_us: default_pause_max_us(),
            backoff_factor: default_backoff_factor(),
            deadlock_timeout: default_deadlock_timeout(),
            debug: false,
            work_ms: 0,
        }
    }
}

/// Get the current Environment Variable configuration
pub fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| match envy::prefixed("GLOBAL_DONE_").from_env::<Config>() {
        Ok(config) => config,
        Err(error) => panic!("{}", error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_env() {
        let config = envy::prefixed("GLOBAL_DONE_TEST_UNSET_")
            .from_iter::<_, Config>(Vec::<(String, String)>::new())
            .unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn overrides_from_env() {
        let vars = vec![
            ("GLOBAL_DONE_GROUP_SIZE".to_owned(), "2".to_owned()),
            ("GLOBAL_DONE_BACKEND".to_owned(), "shmem".to_owned()),
            ("GLOBAL_DONE_DEBUG".to_owned(), "true".to_owned()),
            ("GLOBAL_DONE_MAX_LEVELS".to_owned(), "4".to_owned()),
        ];
        let config = envy::prefixed("GLOBAL_DONE_")
            .from_iter::<_, Config>(vars)
            .unwrap();
        assert_eq!(config.group_size, 2);
        assert_eq!(config.backend, "shmem");
        assert!(config.debug);
        assert_eq!(config.max_levels, Some(4));
        assert_eq!(config.pause_us, 1000);
    }

    fn debug_from(val: &str) -> bool {
        envy::prefixed("GLOBAL_DONE_")
            .from_iter::<_, Config>(vec![("GLOBAL_DONE_DEBUG".to_owned(), val.to_owned())])
            .unwrap()
            .debug
    }

    #[test]
    fn debug_accepts_numeric_switches() {
        assert!(debug_from("1"));
        assert!(debug_from("yes"));
        assert!(debug_from("true"));
        assert!(!debug_from("0"));
        assert!(!debug_from(""));
        assert!(!debug_from("false"));
    }

    #[test]
    fn strategy_and_branch() {
        let vars = vec![
            ("GLOBAL_DONE_STRATEGY".to_owned(), "hstar".to_owned()),
            ("GLOBAL_DONE_BRANCH_K".to_owned(), "3".to_owned()),
        ];
        let config = envy::prefixed("GLOBAL_DONE_")
            .from_iter::<_, Config>(vars)
            .unwrap();
        assert_eq!(config.strategy, "hstar");
        assert_eq!(config.branch_k, 3);
        assert_eq!(Config::default().strategy, "tree");
    }
}
