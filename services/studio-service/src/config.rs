use std::time::Duration;

use studio_common::{env_csv, env_opt, env_or};

use crate::poll::PollPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub admin_emails: Vec<String>,
    pub supabase: Option<SupabaseConfig>,
    pub storage: Option<StorageConfig>,
    pub providers: ProviderConfig,
}

#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: String,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    pub force_path_style: bool,
    /// Prefix for public object URLs; defaults to `{endpoint}/{bucket}`.
    pub public_base_url: String,
}

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub kling_access_key: Option<String>,
    pub kling_secret_key: Option<String>,
    pub kling_base_url: String,
    pub bfl_api_key: Option<String>,
    pub bfl_base_url: String,
    pub flux_poll: PollPolicy,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub vertex_api_key: Option<String>,
    pub vertex_base_url: String,
    pub gemini_image_model: String,
    pub qwen_api_url: Option<String>,
    pub aimovely_email: Option<String>,
    pub aimovely_vcode: Option<String>,
    pub aimovely_base_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", 8080u16),
            database_url: env_opt("DATABASE_URL"),
            admin_emails: env_csv("ADMIN_ALLOWED_EMAILS"),
            supabase: SupabaseConfig::from_env(),
            storage: StorageConfig::from_env(),
            providers: ProviderConfig::from_env(),
        }
    }
}

impl SupabaseConfig {
    fn from_env() -> Option<Self> {
        Some(Self {
            url: env_opt("SUPABASE_URL")?.trim_end_matches('/').to_string(),
            service_key: env_opt("SUPABASE_SERVICE_ROLE_KEY")?,
        })
    }
}

impl StorageConfig {
    fn from_env() -> Option<Self> {
        let endpoint = env_opt("STORAGE_ENDPOINT")?.trim_end_matches('/').to_string();
        let bucket = env_opt("STORAGE_BUCKET").unwrap_or_else(|| "character-assets".to_string());
        let public_base_url = env_opt("STORAGE_PUBLIC_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("{endpoint}/{bucket}"));
        Some(Self {
            access_key: env_opt("STORAGE_ACCESS_KEY")?,
            secret_key: env_opt("STORAGE_SECRET_KEY")?,
            region: env_opt("STORAGE_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            force_path_style: env_opt("STORAGE_FORCE_PATH_STYLE")
                .map(|value| value != "0" && !value.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            endpoint,
            bucket,
            public_base_url,
        })
    }
}

fn base_url(key: &str, default: &str) -> String {
    env_opt(key)
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

impl ProviderConfig {
    fn from_env() -> Self {
        Self {
            kling_access_key: env_opt("KLING_ACCESS_KEY"),
            kling_secret_key: env_opt("KLING_SECRET_KEY"),
            kling_base_url: base_url("KLING_BASE_URL", "https://api-singapore.klingai.com"),
            bfl_api_key: env_opt("BFL_API_KEY"),
            bfl_base_url: base_url("BFL_BASE_URL", "https://api.bfl.ai"),
            flux_poll: PollPolicy {
                interval: Duration::from_millis(env_or("FLUX_POLL_INTERVAL_MS", 2000u64)),
                max_attempts: env_or("FLUX_POLL_MAX_ATTEMPTS", 60u32),
            },
            gemini_api_key: env_opt("GEMINI_API_KEY"),
            gemini_base_url: base_url(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com",
            ),
            vertex_api_key: env_opt("VERTEX_AI_API_KEY"),
            vertex_base_url: base_url("VERTEX_BASE_URL", "https://aiplatform.googleapis.com"),
            gemini_image_model: env_opt("GEMINI_IMAGE_MODEL_ID")
                .unwrap_or_else(|| "gemini-3-pro-image-preview".to_string()),
            qwen_api_url: env_opt("QWEN_API_URL"),
            aimovely_email: env_opt("AIMOVELY_EMAIL"),
            aimovely_vcode: env_opt("AIMOVELY_VCODE"),
            aimovely_base_url: base_url("AIMOVELY_BASE_URL", "https://dev.aimovely.com"),
        }
    }
}

#[cfg(test)]
impl ProviderConfig {
    /// Every provider pointed at `base`, with credentials filled in.
    pub fn for_base_url(base: &str) -> Self {
        Self {
            kling_access_key: Some("ak".to_string()),
            kling_secret_key: Some("sk".to_string()),
            kling_base_url: base.to_string(),
            bfl_api_key: Some("bfl".to_string()),
            bfl_base_url: base.to_string(),
            flux_poll: PollPolicy {
                interval: Duration::from_millis(10),
                max_attempts: 5,
            },
            gemini_api_key: Some("gemini".to_string()),
            gemini_base_url: base.to_string(),
            vertex_api_key: Some("vertex".to_string()),
            vertex_base_url: base.to_string(),
            gemini_image_model: "gemini-3-pro-image-preview".to_string(),
            qwen_api_url: Some(format!("{base}/qwen")),
            aimovely_email: Some("ops@studio.test".to_string()),
            aimovely_vcode: Some("123456".to_string()),
            aimovely_base_url: base.to_string(),
        }
    }
}
