/// Content-based recommender reached over HTTP
///
/// API Flow:
/// GET {base_url}/users/{user_id}/recommendations?limit=n → [{track_id, score, based_on_tracks}]
use crate::{
    error::{AppError, AppResult},
    models::ContentCandidate,
    services::providers::ContentBasedRecommender,
};
use reqwest::Client as HttpClient;
use uuid::Uuid;

#[derive(Clone)]
pub struct HttpContentRecommender {
    http_client: HttpClient,
    api_url: String,
}

impl HttpContentRecommender {
    pub fn new(api_url: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    fn recommendations_url(&self, user_id: Uuid) -> String {
        format!("{}/users/{}/recommendations", self.api_url, user_id)
    }
}

#[async_trait::async_trait]
impl ContentBasedRecommender for HttpContentRecommender {
    async fn generate_content_based_recommendations(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<ContentCandidate>> {
        let url = self.recommendations_url(user_id);

        let response = self
            .http_client
            .get(&url)
            .query(&[("limit", limit.to_string())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                user_id = %user_id,
                status = %status,
                body = %body,
                "Content recommender request failed"
            );
            return Err(AppError::ExternalSource(format!(
                "Content recommender returned status {}: {}",
                status, body
            )));
        }

        let mut candidates: Vec<ContentCandidate> = response.json().await?;
        candidates.retain(|c| c.score.is_finite());
        candidates.truncate(limit);

        tracing::debug!(
            user_id = %user_id,
            count = candidates.len(),
            "Fetched content-based candidates"
        );

        Ok(candidates)
    }
}

/// Stand-in used when no content recommender is configured
#[derive(Clone, Default)]
pub struct DisabledContentRecommender;

#[async_trait::async_trait]
impl ContentBasedRecommender for DisabledContentRecommender {
    async fn generate_content_based_recommendations(
        &self,
        _user_id: Uuid,
        _limit: usize,
    ) -> AppResult<Vec<ContentCandidate>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommendations_url_strips_trailing_slash() {
        let provider = HttpContentRecommender::new("http://content.internal/".to_string());
        let user = Uuid::parse_str("7f0e2b8c-3c0e-4c6a-9d3e-1b2a3c4d5e6f").unwrap();
        assert_eq!(
            provider.recommendations_url(user),
            "http://content.internal/users/7f0e2b8c-3c0e-4c6a-9d3e-1b2a3c4d5e6f/recommendations"
        );
    }

    #[tokio::test]
    async fn test_disabled_recommender_returns_nothing() {
        let provider = DisabledContentRecommender;
        let candidates = provider
            .generate_content_based_recommendations(Uuid::new_v4(), 10)
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_content_candidate_payload_defaults() {
        let json = r#"[{"track_id": "0a1b2c3d-4e5f-4a6b-8c7d-9e0f1a2b3c4d", "score": 0.7}]"#;
        let parsed: Vec<ContentCandidate> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].based_on_tracks.is_empty());
    }
}
