use uuid::Uuid;

pub struct Env {
    pub jwt_secret: String,
    pub database_url: String,
    pub redis_url: String,
    pub frontend_url: String,
    pub ip: String,
    pub port: u16,
    pub workers: usize,
    pub instance_id: Uuid,
    pub presence_ttl: u64,
    pub typing_ttl: u64,
    pub heartbeat_interval: u64,
}

fn parse_or<T: std::str::FromStr>(name: &str, default: &str) -> T {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
        .unwrap_or_else(|_| panic!("{name} must be a valid number"))
}

impl Env {
    fn new() -> Self {
        let jwt_secret = std::env::var("SECRET_KEY")
            .expect("SECRET_KEY must be set in .env file or environment variable");

        let database_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set in .env file or environment variable");
        let redis_url = std::env::var("REDIS_URL")
            .expect("REDIS_URL must be set in .env file or environment variable");

        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());
        let ip = std::env::var("IP").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_or::<u16>("PORT", "8080");
        let workers = parse_or::<usize>("WORKERS", "2");

        // Each process needs its own id so fanout envelopes it published can be skipped.
        let instance_id = std::env::var("INSTANCE_ID")
            .ok()
            .and_then(|v| Uuid::parse_str(&v).ok())
            .unwrap_or_else(Uuid::now_v7);

        let presence_ttl = parse_or::<u64>("PRESENCE_TTL", "60");
        let typing_ttl = parse_or::<u64>("TYPING_TTL", "5");
        let heartbeat_interval = parse_or::<u64>("HEARTBEAT_INTERVAL", "15");
        assert!(
            heartbeat_interval < presence_ttl,
            "HEARTBEAT_INTERVAL must be shorter than PRESENCE_TTL"
        );

        Env {
            jwt_secret,
            database_url,
            redis_url,
            frontend_url,
            ip,
            port,
            workers,
            instance_id,
            presence_ttl,
            typing_ttl,
            heartbeat_interval,
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}
