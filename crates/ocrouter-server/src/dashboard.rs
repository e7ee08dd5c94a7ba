use std::fmt::Write;

use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::SecondsFormat;

use crate::proxy::RouterState;

/// Renders the HTML dashboard from a registry snapshot. Served for every
/// request that matched neither a backend nor the control API.
pub(crate) fn render(state: &RouterState) -> Response {
    let backends = state.registry.all();
    let username = escape(&state.config.username);
    let mdns = if state.config.enable_mdns {
        "enabled"
    } else {
        "disabled"
    };
    let refresh = state.config.scan_interval.as_secs().max(1);

    let table = if backends.is_empty() {
        "<p class=\"empty\">No OpenCode instances discovered yet. Scanning ports…</p>".to_string()
    } else {
        let mut rows = String::new();
        for backend in &backends {
            let (dot, label) = if backend.healthy(state.config.stale_after) {
                ("healthy", "Healthy")
            } else {
                ("stale", "Stale")
            };
            let slug = escape(&backend.slug);
            let domain = escape(&state.config.domain_for(&backend.slug));
            let last_seen = backend
                .last_seen
                .to_rfc3339_opts(SecondsFormat::Secs, true);
            let _ = write!(
                rows,
                "<tr>\
                 <td><span class=\"dot {dot}\"></span>{label}</td>\
                 <td>{project}</td>\
                 <td><code>{slug}</code></td>\
                 <td><code>127.0.0.1:{port}</code></td>\
                 <td><a href=\"http://{domain}\">{domain}</a></td>\
                 <td><a href=\"/{slug}/\">/{slug}/</a></td>\
                 <td>{version}</td>\
                 <td>{last_seen}</td>\
                 </tr>",
                project = escape(&backend.project_name),
                port = backend.port,
                version = escape(&backend.version),
            );
        }
        format!(
            "<table>\
             <thead><tr><th>Status</th><th>Project</th><th>Slug</th><th>Backend</th>\
             <th>Domain</th><th>Path</th><th>Version</th><th>Last Seen</th></tr></thead>\
             <tbody>{rows}</tbody></table>"
        )
    };

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<meta http-equiv="refresh" content="{refresh}">
<title>OpenCode Router — {username}</title>
<style>
  * {{ margin: 0; padding: 0; box-sizing: border-box; }}
  body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
         background: #0f1117; color: #e1e4e8; padding: 2rem; }}
  h1 {{ font-size: 1.5rem; margin-bottom: 0.5rem; color: #58a6ff; }}
  .sub {{ color: #8b949e; margin-bottom: 2rem; font-size: 0.9rem; }}
  table {{ width: 100%; border-collapse: collapse; }}
  th, td {{ text-align: left; padding: 0.7rem 1rem; border-bottom: 1px solid #21262d; }}
  th {{ color: #8b949e; font-weight: 600; font-size: 0.8rem; text-transform: uppercase; letter-spacing: 0.05em; }}
  td {{ font-size: 0.9rem; }}
  a {{ color: #58a6ff; text-decoration: none; }}
  a:hover {{ text-decoration: underline; }}
  .dot {{ display: inline-block; width: 8px; height: 8px; border-radius: 50%; margin-right: 6px; }}
  .dot.healthy {{ background: #3fb950; }}
  .dot.stale {{ background: #f85149; }}
  .empty {{ color: #8b949e; text-align: center; padding: 3rem; }}
  code {{ background: #161b22; padding: 2px 6px; border-radius: 4px; font-size: 0.85rem; }}
  .footer {{ margin-top: 2rem; color: #484f58; font-size: 0.8rem; }}
</style>
</head>
<body>
<h1>OpenCode Router</h1>
<p class="sub">User: <strong>{username}</strong> · mDNS: {mdns} · <a href="/api/backends">JSON API</a></p>
{table}
<p class="footer">Refreshes every {refresh}s</p>
</body>
</html>
"#
    );

    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response()
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
