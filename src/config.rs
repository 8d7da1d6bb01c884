use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct ReaperConfig {
    /// Per-stage deletion window in seconds (graceful stage and finalizer
    /// stage each get one full window).
    /// Env: ENVREAPER_DELETE_TIMEOUT_SECS
    #[envconfig(from = "ENVREAPER_DELETE_TIMEOUT_SECS", default = "60")]
    pub delete_timeout_secs: u64,

    /// How often to re-check a namespace while waiting for it to disappear.
    /// Env: ENVREAPER_POLL_PERIOD_SECS
    #[envconfig(from = "ENVREAPER_POLL_PERIOD_SECS", default = "5")]
    pub poll_period_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_without_env() {
        let cfg = ReaperConfig::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(cfg.delete_timeout_secs, 60);
        assert_eq!(cfg.poll_period_secs, 5);
    }

    #[test]
    fn env_overrides_defaults() {
        let mut vars = HashMap::new();
        vars.insert(
            "ENVREAPER_DELETE_TIMEOUT_SECS".to_string(),
            "120".to_string(),
        );
        vars.insert("ENVREAPER_POLL_PERIOD_SECS".to_string(), "1".to_string());
        let cfg = ReaperConfig::init_from_hashmap(&vars).unwrap();
        assert_eq!(cfg.delete_timeout_secs, 120);
        assert_eq!(cfg.poll_period_secs, 1);
    }
}
