use std::path::PathBuf;

/// Process-wide settings, read once from the environment at startup.
///
/// Missing provider keys are allowed — the corresponding adapter is simply
/// unavailable and callers get an Auth error when they try to use it.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Comma-separated admin emails that can never be demoted.
    pub admin_emails: Vec<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub adzuna_app_id: Option<String>,
    pub adzuna_app_key: Option<String>,
    pub usajobs_api_key: Option<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        // Load .env if present; real env vars win.
        let _ = dotenvy::dotenv();

        let db_path = std::env::var("JOBSCOUT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("jobscout.db"));

        let admin_emails = std::env::var("ADMIN_EMAILS")
            .unwrap_or_default()
            .split(',')
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        Settings {
            db_path,
            admin_emails,
            anthropic_api_key: env_opt("ANTHROPIC_API_KEY"),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            gemini_api_key: env_opt("GEMINI_API_KEY"),
            adzuna_app_id: env_opt("ADZUNA_APP_ID"),
            adzuna_app_key: env_opt("ADZUNA_APP_KEY"),
            usajobs_api_key: env_opt("USAJOBS_API_KEY"),
        }
    }

    /// True if the email (case-insensitive) is protected by ADMIN_EMAILS.
    pub fn is_protected_admin(&self, email: &str) -> bool {
        let lower = email.to_lowercase();
        self.admin_emails.iter().any(|e| e == &lower)
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_admin_is_case_insensitive() {
        let settings = Settings {
            db_path: PathBuf::from("test.db"),
            admin_emails: vec!["root@example.com".into()],
            anthropic_api_key: None,
            openai_api_key: None,
            gemini_api_key: None,
            adzuna_app_id: None,
            adzuna_app_key: None,
            usajobs_api_key: None,
        };
        assert!(settings.is_protected_admin("Root@Example.com"));
        assert!(!settings.is_protected_admin("other@example.com"));
    }
}
