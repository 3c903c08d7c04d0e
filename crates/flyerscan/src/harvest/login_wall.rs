use crate::config::LoginWallConfig;

/// Recognizes a login wall from the post-navigation URL and page text.
#[derive(Debug, Clone)]
pub struct LoginWallDetector {
    url_markers: Vec<String>,
    text_markers: Vec<String>,
}

impl LoginWallDetector {
    pub fn new(config: &LoginWallConfig) -> Self {
        Self {
            url_markers: config.url_markers.iter().map(|m| m.to_lowercase()).collect(),
            text_markers: config.text_markers.iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    pub fn is_login_wall(&self, current_url: &str, body_text: &str) -> bool {
        // Only path and query count; the host may legitimately contain "login".
        let location = match url::Url::parse(current_url) {
            Ok(u) => format!("{}?{}", u.path(), u.query().unwrap_or_default()),
            Err(_) => current_url.to_string(),
        }
        .to_lowercase();

        if self.url_markers.iter().any(|m| location.contains(m)) {
            return true;
        }

        let text = body_text.to_lowercase();
        self.text_markers.iter().any(|m| text.contains(m))
    }
}

impl Default for LoginWallDetector {
    fn default() -> Self {
        Self::new(&LoginWallConfig::default())
    }
}

/// [`LoginWallDetector`] with the default markers.
pub fn detect_login_wall(current_url: &str, body_text: &str) -> bool {
    LoginWallDetector::default().is_login_wall(current_url, body_text)
}
