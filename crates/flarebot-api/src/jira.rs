//! Jira REST client (API v2, basic auth) for the flare project.

use async_trait::async_trait;
use flarebot_core::{CoreError, IssueTracker, Ticket, TrackerUser};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::http::{checked_text, send_error};

/// The `jira` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    /// Base URL, e.g. `https://example.atlassian.net`.
    pub origin: String,
    pub username: String,
    /// API token or password.
    pub password: String,
    pub project_id: String,
    pub project_key: String,
    pub issue_type_id: String,
    /// Priority IDs indexed by flare priority (p0, p1, p2).
    pub priority_ids: Vec<String>,
    /// Custom field holding the comms lead, e.g. `customfield_11405`.
    pub comms_lead_field: String,
}

/// Jira client tuned for a single project.
#[derive(Clone)]
pub struct JiraClient {
    http: reqwest::Client,
    config: JiraConfig,
}

impl std::fmt::Debug for JiraClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JiraClient")
            .field("origin", &self.config.origin)
            .field("project_key", &self.config.project_key)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct IssueBody {
    key: String,
    #[serde(default)]
    fields: Option<IssueFields>,
}

#[derive(Debug, Deserialize)]
struct IssueFields {
    project: ProjectRef,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    assignee: Option<UserRef>,
    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectRef {
    id: String,
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRef {
    #[serde(default)]
    account_id: String,
    #[serde(default)]
    email_address: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct Created {
    key: String,
}

#[derive(Debug, Deserialize)]
struct Transitions {
    #[serde(default)]
    transitions: Vec<Transition>,
}

#[derive(Debug, Deserialize)]
struct Transition {
    id: String,
    name: String,
    #[serde(default)]
    to: Option<TransitionTarget>,
}

#[derive(Debug, Deserialize)]
struct TransitionTarget {
    name: String,
}

impl JiraClient {
    pub fn new(config: JiraConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &JiraConfig {
        &self.config
    }

    fn builder(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.config.origin.trim_end_matches('/'));
        debug!(%method, path, "Jira request");
        self.http
            .request(method, url)
            .basic_auth(&self.config.username, Some(&self.config.password))
    }

    async fn send(&self, req: reqwest::RequestBuilder, path: &str) -> Result<String, CoreError> {
        let resp = req.send().await.map_err(|e| send_error(path, &e))?;
        checked_text(path, resp).await
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<String, CoreError> {
        let mut req = self.builder(method, path);
        if let Some(body) = body {
            req = req.json(body);
        }
        self.send(req, path).await
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, CoreError> {
        let text = self.request(reqwest::Method::GET, path, None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn update_fields(&self, key: &str, fields: serde_json::Value) -> Result<(), CoreError> {
        let path = format!("/rest/api/2/issue/{key}");
        self.request(reqwest::Method::PUT, &path, Some(&json!({ "fields": fields })))
            .await?;
        Ok(())
    }

    fn priority_id(&self, priority: u8) -> Result<&str, CoreError> {
        self.config
            .priority_ids
            .get(usize::from(priority))
            .map(String::as_str)
            .ok_or_else(|| CoreError::Validation(format!("no priority id configured for p{priority}")))
    }
}

/// Picks the transition whose name, or target status name, is `name`.
fn find_transition<'a>(transitions: &'a [Transition], name: &str) -> Option<&'a Transition> {
    transitions.iter().find(|t| {
        t.name == name || t.to.as_ref().is_some_and(|to| to.name == name)
    })
}

fn ticket_from(body: IssueBody, url: String) -> Result<Ticket, CoreError> {
    let fields = body
        .fields
        .ok_or_else(|| CoreError::NotFound(format!("no such ticket {}", body.key)))?;
    Ok(Ticket {
        key: body.key,
        url,
        project_id: fields.project.id,
        project_key: fields.project.key,
        summary: fields.summary,
        assignee: fields.assignee.map(|a| a.email_address),
        labels: fields.labels,
    })
}

#[async_trait]
impl IssueTracker for JiraClient {
    async fn get_ticket_by_key(&self, key: &str) -> Result<Ticket, CoreError> {
        let body: IssueBody = self
            .get_json(&format!(
                "/rest/api/2/issue/{key}?fields=project,summary,assignee,labels"
            ))
            .await?;
        let url = self.ticket_url(&body.key);
        ticket_from(body, url)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<TrackerUser, CoreError> {
        let text = self
            .send(
                self.builder(reqwest::Method::GET, "/rest/api/2/user/search")
                    .query(&[("query", email)]),
                "/rest/api/2/user/search",
            )
            .await?;
        let users: Vec<UserRef> = serde_json::from_str(&text)?;
        let user = users
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::NotFound(format!("Jira user for {email}")))?;
        Ok(TrackerUser {
            account_id: user.account_id,
            email: if user.email_address.is_empty() {
                email.to_string()
            } else {
                user.email_address
            },
            display_name: user.display_name,
        })
    }

    async fn create_ticket(
        &self,
        priority: u8,
        summary: &str,
        assignee: &TrackerUser,
    ) -> Result<Ticket, CoreError> {
        let body = json!({
            "fields": {
                "project": { "id": self.config.project_id },
                "issuetype": { "id": self.config.issue_type_id },
                "assignee": { "accountId": assignee.account_id },
                "summary": summary,
                "priority": { "id": self.priority_id(priority)? },
            }
        });
        let text = self
            .request(reqwest::Method::POST, "/rest/api/2/issue", Some(&body))
            .await?;
        let created: Created = serde_json::from_str(&text)?;
        Ok(Ticket {
            url: self.ticket_url(&created.key),
            key: created.key,
            project_id: self.config.project_id.clone(),
            project_key: self.config.project_key.clone(),
            summary: summary.to_string(),
            assignee: Some(assignee.email.clone()),
            labels: Vec::new(),
        })
    }

    async fn set_label(&self, key: &str, label: &str) -> Result<(), CoreError> {
        let path = format!("/rest/api/2/issue/{key}");
        let body = json!({ "update": { "labels": [ { "add": label } ] } });
        self.request(reqwest::Method::PUT, &path, Some(&body)).await?;
        Ok(())
    }

    async fn assign_ticket(&self, key: &str, user: &TrackerUser) -> Result<(), CoreError> {
        self.update_fields(key, json!({ "assignee": { "accountId": user.account_id } }))
            .await
    }

    async fn set_comms_lead(&self, key: &str, user: &TrackerUser) -> Result<(), CoreError> {
        if self.config.comms_lead_field.is_empty() {
            return Err(CoreError::Validation(
                "no comms lead field configured".to_string(),
            ));
        }
        let mut fields = serde_json::Map::new();
        fields.insert(
            self.config.comms_lead_field.clone(),
            json!({ "accountId": user.account_id }),
        );
        self.update_fields(key, serde_json::Value::Object(fields))
            .await
    }

    async fn do_transition(&self, key: &str, transition: &str) -> Result<(), CoreError> {
        let path = format!("/rest/api/2/issue/{key}/transitions");
        let available: Transitions = self.get_json(&path).await?;
        let Some(found) = find_transition(&available.transitions, transition) else {
            let allowed: Vec<&str> = available
                .transitions
                .iter()
                .map(|t| t.name.as_str())
                .collect();
            return Err(CoreError::Validation(format!(
                "Jira transition \"{transition}\" not found. Allowed transitions for current status: [{}]",
                allowed.join(", ")
            )));
        };
        let body = json!({ "transition": { "id": found.id } });
        self.request(reqwest::Method::POST, &path, Some(&body)).await?;
        Ok(())
    }

    async fn set_description(&self, key: &str, description: &str) -> Result<(), CoreError> {
        self.update_fields(key, json!({ "description": description }))
            .await
    }

    fn ticket_url(&self, key: &str) -> String {
        format!("{}/browse/{key}", self.config.origin.trim_end_matches('/'))
    }
}
