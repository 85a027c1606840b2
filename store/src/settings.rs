//! Store configuration loaded via OrthoConfig.

use std::path::PathBuf;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use url::Url;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

fn default_fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join("demo.json")
}

/// Configuration for wiring a store to its gateway.
///
/// When no gateway URL is configured the store runs offline against the
/// in-memory gateway seeded from the fixture file.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "LEDGER_STORE")]
pub struct StoreSettings {
    /// Base URL of the PostgREST endpoint, e.g. `https://db.example/rest/v1`.
    pub gateway_url: Option<String>,
    /// Anonymous API key sent with every gateway request.
    pub api_key: Option<String>,
    /// Per-request timeout for the HTTP gateway, in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Fixture seeding the offline gateway.
    pub fixture_path: Option<PathBuf>,
}

impl StoreSettings {
    /// Parse the configured gateway URL, if any.
    ///
    /// # Errors
    ///
    /// Returns [`url::ParseError`] when the configured value is not a URL.
    pub fn gateway_url(&self) -> Result<Option<Url>, url::ParseError> {
        self.gateway_url.as_deref().map(Url::parse).transpose()
    }

    /// Return the configured request timeout, falling back to the default.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    /// Return the configured fixture path, falling back to the bundled demo.
    pub fn fixture_path(&self) -> PathBuf {
        self.fixture_path
            .clone()
            .unwrap_or_else(default_fixture_path)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for store configuration parsing.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    const VARS: [&str; 4] = [
        "LEDGER_STORE_GATEWAY_URL",
        "LEDGER_STORE_API_KEY",
        "LEDGER_STORE_REQUEST_TIMEOUT_SECS",
        "LEDGER_STORE_FIXTURE_PATH",
    ];

    fn load_from_empty_args() -> StoreSettings {
        StoreSettings::load_from_iter([OsString::from("ledger-snapshot")])
            .expect("config should load")
    }

    #[rstest]
    fn defaults_apply_when_nothing_is_set() {
        let _guard = lock_env(VARS.map(|name| (name, None::<String>)));

        let settings = load_from_empty_args();
        assert_eq!(settings.gateway_url(), Ok(None));
        assert!(settings.api_key.is_none());
        assert_eq!(settings.request_timeout(), Duration::from_secs(15));
        assert_eq!(settings.fixture_path(), default_fixture_path());
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env([
            (
                "LEDGER_STORE_GATEWAY_URL",
                Some("https://db.example.test/rest/v1".to_owned()),
            ),
            ("LEDGER_STORE_API_KEY", Some("anon".to_owned())),
            ("LEDGER_STORE_REQUEST_TIMEOUT_SECS", Some("3".to_owned())),
            (
                "LEDGER_STORE_FIXTURE_PATH",
                Some("/tmp/ledger-fixture.json".to_owned()),
            ),
        ]);

        let settings = load_from_empty_args();
        assert_eq!(
            settings.gateway_url().ok().flatten().map(String::from),
            Some("https://db.example.test/rest/v1".to_owned())
        );
        assert_eq!(settings.api_key.as_deref(), Some("anon"));
        assert_eq!(settings.request_timeout(), Duration::from_secs(3));
        assert_eq!(
            settings.fixture_path(),
            PathBuf::from("/tmp/ledger-fixture.json")
        );
    }

    #[rstest]
    fn malformed_gateway_urls_are_reported() {
        let _guard = lock_env([
            ("LEDGER_STORE_GATEWAY_URL", Some("not a url".to_owned())),
            ("LEDGER_STORE_API_KEY", None),
            ("LEDGER_STORE_REQUEST_TIMEOUT_SECS", None),
            ("LEDGER_STORE_FIXTURE_PATH", None),
        ]);

        assert!(load_from_empty_args().gateway_url().is_err());
    }

    #[rstest]
    fn zero_timeout_falls_back_to_the_default() {
        let _guard = lock_env([
            ("LEDGER_STORE_GATEWAY_URL", None::<String>),
            ("LEDGER_STORE_API_KEY", None),
            ("LEDGER_STORE_REQUEST_TIMEOUT_SECS", Some("0".to_owned())),
            ("LEDGER_STORE_FIXTURE_PATH", None),
        ]);

        assert_eq!(
            load_from_empty_args().request_timeout(),
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
    }
}
