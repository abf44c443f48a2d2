/// Intervals below one hour are never honored; smaller values clamp here.
pub const MIN_CHECK_INTERVAL_SECS: u64 = 3600;

/// Interval used when the host never configured one.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 24 * 3600;

/// Who the running application is. Set once before `start()` and immutable
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub company_name: String,
    pub app_name: String,
    /// User-facing version, compared against feed candidates by default.
    pub display_version: String,
    /// Finer-grained internal version. When present, it is compared against
    /// a candidate's build version instead, but only if the candidate
    /// supplies one too.
    pub build_version: Option<String>,
}

impl AppIdentity {
    pub fn new(
        company_name: impl Into<String>,
        app_name: impl Into<String>,
        display_version: impl Into<String>,
    ) -> Self {
        Self {
            company_name: company_name.into(),
            app_name: app_name.into(),
            display_version: display_version.into(),
            build_version: None,
        }
    }

    pub fn with_build_version(mut self, build_version: impl Into<String>) -> Self {
        self.build_version = Some(build_version.into());
        self
    }

    pub(crate) fn is_valid(&self) -> bool {
        !self.app_name.is_empty() && !self.display_version.is_empty()
    }
}

/// How and where to check. Mutable only before `start()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConfig {
    pub appcast_url: String,
    pub check_interval_secs: u64,
    pub automatic_checks: bool,
    /// ISO 639 language code, advisory for hosts that localize prompts.
    pub language: Option<String>,
    /// Registry-style path under which the host wants settings persisted.
    pub settings_path: String,
}

impl UpdateConfig {
    pub fn new(appcast_url: impl Into<String>) -> Self {
        Self {
            appcast_url: appcast_url.into(),
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            automatic_checks: false,
            language: None,
            settings_path: String::new(),
        }
    }

    pub fn check_interval_secs(mut self, secs: u64) -> Self {
        self.check_interval_secs = secs;
        self
    }

    pub fn automatic_checks(mut self, enabled: bool) -> Self {
        self.automatic_checks = enabled;
        self
    }

    pub fn language(mut self, code: impl Into<String>) -> Self {
        self.language = Some(code.into());
        self
    }

    pub fn settings_path(mut self, path: impl Into<String>) -> Self {
        self.settings_path = path.into();
        self
    }

    /// The interval the scheduler actually uses; the minimum is enforced at
    /// the point of use, never by mutating the stored value.
    pub fn effective_interval_secs(&self) -> u64 {
        self.check_interval_secs.max(MIN_CHECK_INTERVAL_SECS)
    }

    pub(crate) fn is_valid(&self) -> bool {
        !self.appcast_url.is_empty()
    }
}
