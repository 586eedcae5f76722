use serde_json::json;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Exit code for an HTTP status: 0=2xx, 1=4xx, 2=anything else.
pub fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

/// Print `output` to stdout on success, stderr otherwise, and pass the code through.
pub fn emit(output: &serde_json::Value, exit_code: i32) -> i32 {
    if exit_code == 0 {
        println!("{}", pretty(output));
    } else {
        eprintln!("{}", pretty(output));
    }
    exit_code
}

/// Execute an API request, print the response, exit with structured code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
    query: &[(String, String)],
) -> i32 {
    let url = match build_url(api_url, path, query) {
        Ok(url) => url,
        Err(e) => {
            return emit(
                &json!({
                    "error": "cli_error",
                    "message": format!("Invalid URL: {api_url}{path}: {e}")
                }),
                4,
            );
        }
    };

    let mut req = client().request(method, url);
    if let Some(t) = token {
        req = req.header("Authorization", format!("Bearer {t}"));
    }
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            return emit(
                &json!({
                    "error": "connection_error",
                    "message": format!("{e}"),
                    "docs_hint": "Is deskgate running? Check DESKGATE_API_URL."
                }),
                3,
            );
        }
    };

    let exit_code = exit_code_for(resp.status().as_u16());
    let resp_body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };
    emit(&resp_body, exit_code)
}

fn build_url(
    api_url: &str,
    path: &str,
    query: &[(String, String)],
) -> Result<url::Url, url::ParseError> {
    let mut url = url::Url::parse(&format!("{}{path}", api_url.trim_end_matches('/')))?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in query {
            pairs.append_pair(k, v);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_path_and_query() {
        let url = build_url(
            "http://localhost:3000/",
            "/v1/tools",
            &[("role".to_string(), "sales assistant".to_string())],
        )
        .unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/v1/tools?role=sales+assistant");
    }

    #[test]
    fn exit_codes_follow_status_class() {
        assert_eq!(exit_code_for(200), 0);
        assert_eq!(exit_code_for(204), 0);
        assert_eq!(exit_code_for(403), 1);
        assert_eq!(exit_code_for(429), 1);
        assert_eq!(exit_code_for(502), 2);
    }
}
