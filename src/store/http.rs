use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::{NewTask, Task, TaskPatch};
use crate::store::{StoreError, TaskStore};

#[derive(Debug, Deserialize)]
struct RemoteError {
    message: String,
}

/// Store backed by the REST API served by `api::router`.
pub struct HttpTaskStore {
    client: Client,
    base_url: Url,
}

impl HttpTaskStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| StoreError::Unavailable(format!("invalid base url {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::Unavailable(format!(
                "base url {} cannot carry a path",
                base_url
            )));
        }
        let client = Client::builder().build()?;
        Ok(Self { client, base_url })
    }

    fn tasks_url(&self, id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("tasks").extend(id);
        }
        url
    }

    async fn fail(response: Response) -> StoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<RemoteError>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        warn!("task api returned {}: {}", status, message);
        StoreError::Remote {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl TaskStore for HttpTaskStore {
    async fn add(&self, task: NewTask) -> Result<Task, StoreError> {
        let task = task.normalized()?;
        let response = self
            .client
            .post(self.tasks_url(None))
            .json(&task)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        Ok(response.json::<Task>().await?)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let response = self.client.get(self.tasks_url(Some(id))).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json::<Task>().await?)),
            _ => Err(Self::fail(response).await),
        }
    }

    async fn get_all(&self) -> Result<Vec<Task>, StoreError> {
        let response = self.client.get(self.tasks_url(None)).send().await?;

        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        let tasks = response.json::<Vec<Task>>().await?;
        debug!("fetched {} tasks from {}", tasks.len(), self.base_url);
        Ok(tasks)
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Option<Task>, StoreError> {
        let response = self
            .client
            .patch(self.tasks_url(Some(id)))
            .json(&patch)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json::<Task>().await?)),
            _ => Err(Self::fail(response).await),
        }
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let response = self.client.delete(self.tasks_url(Some(id))).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(Self::fail(response).await),
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<Task>, StoreError> {
        let mut url = self.tasks_url(None);
        url.query_pairs_mut().append_pair("q", query);
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        Ok(response.json::<Vec<Task>>().await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("health");
        }
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_url_appends_segments() {
        let store = HttpTaskStore::new("http://127.0.0.1:3000/api/").unwrap();

        assert_eq!(store.tasks_url(None).as_str(), "http://127.0.0.1:3000/api/tasks");
        assert_eq!(
            store.tasks_url(Some("0192-ab")).as_str(),
            "http://127.0.0.1:3000/api/tasks/0192-ab"
        );
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        assert!(HttpTaskStore::new("not a url").is_err());
        assert!(HttpTaskStore::new("mailto:tasks@example.com").is_err());
    }
}
