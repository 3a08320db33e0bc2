//! HTML login page for OAuth authorization.

/// Render the login form for a pending authorization.
///
/// All interpolated values are HTML-escaped to prevent XSS.
pub fn render_login_page(pending_id: Option<&str>, error_message: Option<&str>) -> String {
    let error_html = error_message
        .map(|msg| format!(r#"<div class="error">{}</div>"#, html_escape(msg)))
        .unwrap_or_default();

    let pending_field = pending_id
        .map(|id| format!(r#"<input type="hidden" name="pending" value="{}">"#, html_escape(id)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Login - Local MCP</title>
<style>
* {{ box-sizing: border-box; }}
body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; background: linear-gradient(135deg, #1a1a2e 0%, #16213e 100%); min-height: 100vh; display: flex; align-items: center; justify-content: center; margin: 0; padding: 20px; }}
.card {{ background: #fff; padding: 40px; border-radius: 12px; box-shadow: 0 20px 60px rgba(0,0,0,0.3); width: 100%; max-width: 400px; }}
h1 {{ margin: 0 0 8px; color: #1a1a2e; font-size: 28px; text-align: center; }}
.subtitle {{ color: #666; text-align: center; margin-bottom: 30px; font-size: 14px; }}
.error {{ background: #fee; color: #c00; padding: 12px; border-radius: 6px; margin-bottom: 20px; font-size: 14px; }}
label {{ display: block; margin-bottom: 6px; color: #333; font-weight: 500; font-size: 14px; }}
input[type="text"], input[type="password"] {{ width: 100%; padding: 12px; border: 2px solid #e0e0e0; border-radius: 6px; font-size: 16px; margin-bottom: 20px; }}
input:focus {{ outline: none; border-color: #4a90d9; }}
button {{ width: 100%; padding: 14px; background: #4a90d9; color: #fff; border: none; border-radius: 6px; font-size: 16px; font-weight: 600; cursor: pointer; }}
button:hover {{ background: #357abd; }}
</style>
</head>
<body>
<div class="card">
<h1>Local MCP</h1>
<div class="subtitle">Sign in to continue</div>
{error_html}
<form method="POST" action="/login">
{pending_field}
<label for="username">Username</label>
<input type="text" id="username" name="username" autocomplete="username" required autofocus>
<label for="password">Password</label>
<input type="password" id="password" name="password" autocomplete="current-password" required>
<button type="submit">Sign In</button>
</form>
</div>
</body>
</html>"#
    )
}

/// Page shown when the pending authorization is gone.
pub fn render_session_expired() -> String {
    r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Session expired - Local MCP</title></head>
<body><p>Session expired. Please try again.</p></body>
</html>"#
        .to_string()
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
