use std::sync::Arc;
use std::time::Duration;

use askama::Template;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::db::Database;
use crate::news::{Article, NewsClient};
use crate::preferences::{Frequency, Preference};

#[derive(Template)]
#[template(path = "digest.html")]
pub struct DigestTemplate<'a> {
    pub subject: &'a str,
    pub frequency: &'a str,
    pub categories: String,
    pub articles: &'a [Article],
}

#[derive(Debug, Clone)]
pub struct Digest {
    pub subject: String,
    pub body: String,
    pub article_count: usize,
}

pub fn render_digest(
    frequency: Frequency,
    categories: &[String],
    articles: &[Article],
) -> anyhow::Result<Digest> {
    let subject = format!("Your {} news digest", frequency);
    let body = DigestTemplate {
        subject: &subject,
        frequency: frequency.as_str(),
        categories: categories.join(", "),
        articles,
    }
    .render()?;

    Ok(Digest {
        subject,
        body,
        article_count: articles.len(),
    })
}

/// Turns due subscriptions into rendered digests in the outbox.
pub struct Scheduler {
    db: Arc<Database>,
    news: Arc<NewsClient>,
    running: Arc<RwLock<bool>>,
}

impl Scheduler {
    pub fn new(db: Arc<Database>, news: Arc<NewsClient>) -> Self {
        Self {
            db,
            news,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Build digests for every subscription due at `now`. Returns how many
    /// were written; a pass already in progress makes this a no-op.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        {
            let mut running = self.running.write().await;
            if *running {
                info!("Dispatch already in progress, skipping");
                return Ok(0);
            }
            *running = true;
        }

        let result = self.do_dispatch(now).await;

        {
            let mut running = self.running.write().await;
            *running = false;
        }

        result
    }

    async fn do_dispatch(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let due = self.db.due_preferences(now).await?;
        info!("{} subscriptions due for a digest", due.len());

        let mut written = 0;
        for pref in due {
            match self.dispatch_one(&pref, now).await {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to dispatch digest for user '{}': {}", pref.user_id, e),
            }
        }

        info!("Dispatch complete, {} digests written", written);
        Ok(written)
    }

    async fn dispatch_one(&self, pref: &Preference, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let articles = self.news.aggregate(&pref.categories).await;

        // Nothing to send; still move the schedule forward
        let written = if articles.is_empty() {
            info!("No articles for user '{}', skipping digest", pref.user_id);
            false
        } else {
            let digest = render_digest(pref.frequency, &pref.categories, &articles)?;
            self.db
                .record_digest(
                    &pref.user_id,
                    &pref.email,
                    &digest.subject,
                    &digest.body,
                    digest.article_count,
                )
                .await?;
            true
        };

        self.db
            .reschedule(&pref.user_id, pref.frequency.next_send_at(now))
            .await?;

        Ok(written)
    }
}

pub async fn start_background_dispatch(scheduler: Arc<Scheduler>, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes * 60);

    loop {
        info!("Starting scheduled digest dispatch");
        if let Err(e) = scheduler.dispatch_due(Utc::now()).await {
            error!("Scheduled digest dispatch failed: {}", e);
        }
        tokio::time::sleep(interval).await;
    }
}
