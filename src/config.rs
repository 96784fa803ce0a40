use std::env;

#[derive(Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub sqlite_path: String,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub token_header: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let server_port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8080);

        let sqlite_path = env::var("SQLITE_PATH").unwrap_or_else(|_| "/opt/sblog/data.sqlite".to_string());
        let database_url = env::var("DATABASE_URL").ok();

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| "xK3tUvPh92rQmWy5nDcB".to_string());

        let token_header = env::var("TOKEN_HEADER").unwrap_or_else(|_| "authorization".to_string());

        let access_token_minutes = env::var("ACCESS_TOKEN_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(60);

        let refresh_token_days = env::var("REFRESH_TOKEN_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(7);

        Self {
            server_port,
            sqlite_path,
            database_url,
            jwt_secret,
            token_header,
            access_token_minutes,
            refresh_token_days,
        }
    }

    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        let path = self.sqlite_path.trim();
        if path.starts_with("sqlite:") || path.starts_with("file:") {
            return path.to_string();
        }
        format!("sqlite://{}", path)
    }
}
