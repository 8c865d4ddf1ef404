//! Blocking HTTP client for a running server.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;

pub struct Client {
    base_url: String,
    token: Option<String>,
}

impl Client {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            token,
        }
    }

    pub fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let mut request = self.request("GET", path);
        for (key, value) in query {
            request = request.query(key, value);
        }
        finish(path, request.call())
    }

    pub fn post<T: Serialize>(&self, path: &str, body: Option<&T>) -> Result<Value> {
        let request = self.request("POST", path);
        let response = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        finish(path, response)
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let request = ureq::request(method, &format!("{}{path}", self.base_url));
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }
}

fn finish(path: &str, result: Result<ureq::Response, ureq::Error>) -> Result<Value> {
    match result {
        Ok(response) => response
            .into_json()
            .with_context(|| format!("invalid JSON response from {path}")),
        Err(ureq::Error::Status(code, response)) => {
            let message = response
                .into_json::<Value>()
                .ok()
                .and_then(|body| body["error"]["message"].as_str().map(str::to_owned))
                .unwrap_or_else(|| "no error message".to_owned());
            Err(anyhow!("{path} returned {code}: {message}"))
        }
        Err(err) => Err(err).with_context(|| format!("request to {path} failed")),
    }
}
