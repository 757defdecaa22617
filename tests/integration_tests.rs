//! Integration tests for the newsletter digest service
//!
//! These tests exercise the public API end to end: configuration loading,
//! persistence across reopened databases, article aggregation against a
//! stubbed news API, and the dispatch pass that fills the digest outbox.

mod common {
    use serde_json::json;
    use tempfile::TempDir;

    /// Create a temporary directory for test databases
    pub fn create_temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp directory")
    }

    /// Create a test database path
    pub fn create_db_path(temp_dir: &TempDir) -> String {
        let db_path = temp_dir.path().join("test.db");
        format!("sqlite:{}?mode=rwc", db_path.display())
    }

    pub fn search_body(prefix: &str, count: usize) -> serde_json::Value {
        let articles: Vec<_> = (1..=count)
            .map(|i| {
                json!({
                    "title": format!("{} {}", prefix, i),
                    "url": format!("https://news.example.com/{}/{}", prefix, i),
                    "description": format!("Story {} about {}", i, prefix),
                })
            })
            .collect();
        json!({ "status": "ok", "articles": articles })
    }
}

#[cfg(test)]
mod config_integration_tests {
    use newsletter_digest::config::Config;

    #[test]
    fn test_load_shipped_config() {
        let config = Config::load("digest.toml");
        assert!(config.is_ok(), "Failed to load digest.toml: {:?}", config.err());

        let config = config.unwrap();
        assert!(config.dispatch_interval > 0);
        assert_eq!(config.news.timeout_secs, 15);
        assert!(config.news.base_url.starts_with("https://"));
    }
}

#[cfg(test)]
mod database_integration_tests {
    use super::common::*;
    use chrono::{TimeZone, Utc};
    use newsletter_digest::db::Database;
    use newsletter_digest::preferences::{Frequency, ValidPreferences};

    #[tokio::test]
    async fn test_database_persistence() {
        let temp_dir = create_temp_dir();
        let db_url = create_db_path(&temp_dir);
        let next = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();

        {
            let db = Database::new(&db_url).await.unwrap();
            db.initialize().await.unwrap();

            let prefs = ValidPreferences {
                email: "reader@example.com".to_string(),
                frequency: Frequency::Weekly,
                categories: vec!["science".to_string(), "space".to_string()],
            };
            db.upsert_preference("reader", &prefs, next).await.unwrap();
            db.record_digest("reader", "reader@example.com", "S", "<p>B</p>", 4)
                .await
                .unwrap();
        }

        // Reopen without reinitializing
        {
            let db = Database::new(&db_url).await.unwrap();

            let pref = db.get_preference("reader").await.unwrap().unwrap();
            assert_eq!(pref.frequency, Frequency::Weekly);
            assert_eq!(pref.categories, vec!["science", "space"]);
            assert_eq!(pref.next_send_at, Some(next));

            let digests = db.get_digests_for_user("reader").await.unwrap();
            assert_eq!(digests.len(), 1);
            assert_eq!(digests[0].article_count, 4);
        }
    }
}

#[cfg(test)]
mod aggregator_integration_tests {
    use super::common::*;
    use newsletter_digest::config::NewsConfig;
    use newsletter_digest::news::{NewsClient, ARTICLES_PER_CATEGORY};
    use std::time::Duration;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> NewsClient {
        NewsClient::new(&NewsConfig {
            base_url: server.uri(),
            timeout_secs: 5,
            api_key: None,
        })
        .unwrap()
        .with_api_key(None)
    }

    #[tokio::test]
    async fn test_all_categories_full() {
        let server = MockServer::start().await;
        let categories = ["world", "business", "sports"];
        for (i, category) in categories.iter().enumerate() {
            Mock::given(method("GET"))
                .and(query_param("q", *category))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(search_body(category, 5 + i * 3))
                        .set_delay(Duration::from_millis(100 * (3 - i as u64))),
                )
                .mount(&server)
                .await;
        }

        let input: Vec<String> = categories.iter().map(|c| c.to_string()).collect();
        let articles = client(&server).aggregate(&input).await;

        assert_eq!(articles.len(), ARTICLES_PER_CATEGORY * categories.len());
        for (chunk, category) in articles.chunks(ARTICLES_PER_CATEGORY).zip(categories) {
            for (i, article) in chunk.iter().enumerate() {
                assert_eq!(article.title, format!("{} {}", category, i + 1));
            }
        }
    }

    #[tokio::test]
    async fn test_middle_failure_keeps_neighbours() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body("a", 2)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("q", "b"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("q", "c"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body("c", 1)))
            .mount(&server)
            .await;

        let input = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let titles: Vec<_> = client(&server)
            .aggregate(&input)
            .await
            .into_iter()
            .map(|a| a.title)
            .collect();

        assert_eq!(titles, vec!["a 1", "a 2", "c 1"]);
    }

    #[tokio::test]
    async fn test_unreachable_api_yields_empty() {
        let client = NewsClient::new(&NewsConfig {
            base_url: "http://127.0.0.1:9/v2/everything".to_string(),
            timeout_secs: 2,
            api_key: None,
        })
        .unwrap();

        let articles = client.aggregate(&["anything".to_string()]).await;
        assert!(articles.is_empty());
    }
}

#[cfg(test)]
mod end_to_end_tests {
    use super::common::*;
    use chrono::{Duration, Utc};
    use newsletter_digest::config::NewsConfig;
    use newsletter_digest::db::Database;
    use newsletter_digest::digest::Scheduler;
    use newsletter_digest::news::NewsClient;
    use newsletter_digest::preferences::{Frequency, PreferencesRequest};
    use std::sync::Arc;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_subscription_to_outbox_workflow() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "climate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body("climate", 8)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("q", "energy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body("energy", 2)))
            .mount(&server)
            .await;

        let temp_dir = create_temp_dir();
        let db = Database::new(&create_db_path(&temp_dir)).await.unwrap();
        db.initialize().await.unwrap();
        let db = Arc::new(db);

        let news = NewsClient::new(&NewsConfig {
            base_url: server.uri(),
            timeout_secs: 5,
            api_key: None,
        })
        .unwrap()
        .with_api_key(None);
        let scheduler = Scheduler::new(db.clone(), Arc::new(news));

        let request: PreferencesRequest = serde_json::from_value(serde_json::json!({
            "email": "green@example.com",
            "frequency": "weekly",
            "categories": ["climate", "energy"]
        }))
        .unwrap();
        let prefs = request.validate().unwrap();

        let subscribed_at = Utc::now();
        let first_send = prefs.frequency.next_send_at(subscribed_at);
        db.upsert_preference("green", &prefs, first_send).await.unwrap();

        // Not yet due
        assert_eq!(scheduler.dispatch_due(subscribed_at).await.unwrap(), 0);

        let send_time = first_send + Duration::minutes(1);
        assert_eq!(scheduler.dispatch_due(send_time).await.unwrap(), 1);

        let digests = db.get_digests_for_user("green").await.unwrap();
        assert_eq!(digests.len(), 1);
        let digest = &digests[0];
        assert_eq!(digest.email, "green@example.com");
        assert_eq!(digest.subject, "Your weekly news digest");
        assert_eq!(digest.article_count, 7);

        let climate_pos = digest.body.find("climate 5").unwrap();
        let energy_pos = digest.body.find("energy 1").unwrap();
        assert!(climate_pos < energy_pos);
        assert!(!digest.body.contains("climate 6"));

        let pref = db.get_preference("green").await.unwrap().unwrap();
        assert_eq!(
            pref.next_send_at,
            Some(Frequency::Weekly.next_send_at(send_time))
        );
    }
}
