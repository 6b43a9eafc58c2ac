//! Server-rendered HTML pages.

use crate::job::{JobId, ResultBundle};
use std::path::Path;

const STYLE: &str = r#"
    :root { --bg: #1d1a16; --card: #2a251f; --accent: #c9a227; --text: #eee; --muted: #999; --error: #e06c5a; }
    * { box-sizing: border-box; margin: 0; padding: 0; }
    body { font-family: system-ui, -apple-system, sans-serif; background: var(--bg); color: var(--text); padding: 2rem 1rem; min-height: 100vh; }
    main { max-width: 40rem; margin: 0 auto; }
    h1 { font-size: 1.6rem; margin-bottom: 0.25rem; }
    .sub { color: var(--muted); margin-bottom: 1.5rem; }
    .card { background: var(--card); padding: 1.25rem; border-radius: 8px; margin-bottom: 1rem; }
    .notice { border-left: 4px solid var(--error); padding: 0.75rem 1rem; margin-bottom: 1rem; background: var(--card); }
    input[type=file] { width: 100%; margin: 0.75rem 0; color: var(--text); }
    button { background: var(--accent); border: none; color: #111; padding: 0.6rem 1.2rem; border-radius: 4px; cursor: pointer; font-size: 1rem; }
    .bar { height: 14px; background: #111; border-radius: 7px; overflow: hidden; margin: 1rem 0 0.5rem; }
    .bar div { height: 100%; background: var(--accent); width: 0; transition: width 0.4s; }
    .error { color: var(--error); }
    ul { list-style: none; }
    li { padding: 0.35rem 0; display: flex; justify-content: space-between; }
    a { color: var(--accent); text-decoration: none; }
    a:hover { text-decoration: underline; }
"#;

/// User-facing text for an `?error=` code.
pub fn notice(code: &str) -> Option<&'static str> {
    match code {
        "no_file" => Some("No file selected"),
        "invalid_type" => Some("Invalid file type. Please upload MP3, WAV, M4A, or FLAC files."),
        "not_found" => Some("Job not found"),
        _ => None,
    }
}

/// Escape text for HTML element and attribute content.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{title}</title>
  <style>{STYLE}</style>
</head>
<body>
<main>
{body}
</main>
</body>
</html>
"#,
        title = escape(title),
    )
}

pub fn index(notice: Option<&str>) -> String {
    let notice = notice
        .map(|text| format!(r#"<div class="notice">{}</div>"#, escape(text)))
        .unwrap_or_default();

    page(
        "Organist",
        &format!(
            r#"<h1>Organist</h1>
<p class="sub">Turn a recording into a pipe-organ MIDI score.</p>
{notice}
<form class="card" action="/upload" method="post" enctype="multipart/form-data">
  <label for="file">Audio file (MP3, WAV, M4A or FLAC, up to 100 MB)</label>
  <input type="file" id="file" name="file" accept=".mp3,.wav,.m4a,.flac" required>
  <button type="submit">Upload and process</button>
</form>"#
        ),
    )
}

pub fn processing(job_id: &JobId) -> String {
    page(
        "Processing - Organist",
        &format!(
            r#"<h1>Processing</h1>
<p class="sub">Job {job_id}</p>
<div class="card">
  <div id="message">Starting...</div>
  <div class="bar"><div id="bar"></div></div>
  <div id="percent">0%</div>
</div>
<p><a href="/">Upload another file</a></p>
<script>
  const jobId = "{job_id}";
  async function poll() {{
    try {{
      const res = await fetch(`/api/status/${{jobId}}`);
      const job = await res.json();
      if (!res.ok) {{
        document.getElementById('message').textContent = job.error || 'Job not found';
        return;
      }}
      document.getElementById('message').textContent = job.message;
      document.getElementById('bar').style.width = `${{job.progress}}%`;
      document.getElementById('percent').textContent = `${{job.progress}}%`;
      if (job.status === 'completed') {{
        window.location = `/results/${{jobId}}`;
        return;
      }}
      if (job.status === 'error') {{
        document.getElementById('message').classList.add('error');
        return;
      }}
    }} catch (e) {{
      document.getElementById('message').textContent = 'Lost contact with the server, retrying...';
    }}
    setTimeout(poll, 1000);
  }}
  poll();
</script>"#
        ),
    )
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn download_item(job_id: &JobId, file_type: &str, label: &str, path: &Path) -> String {
    let name = file_name(path);
    format!(
        r#"<li><span>{label}</span><a href="/download/{job_id}/{file_type}/{href}">{name}</a></li>"#,
        label = escape(label),
        href = escape(&name),
        name = escape(&name),
    )
}

pub fn results(job_id: &JobId, bundle: &ResultBundle) -> String {
    let combined = download_item(job_id, "midi", "Organ score", &bundle.combined_midi);

    let midi: String = bundle
        .midi_files
        .iter()
        .map(|(stem, path)| download_item(job_id, "midi", &organ_score::title_case(stem), path))
        .collect();

    let stems: String = bundle
        .stems
        .iter()
        .map(|(stem, path)| download_item(job_id, "stem", &organ_score::title_case(stem), path))
        .collect();

    page(
        &format!("{} - Organist", bundle.track_name),
        &format!(
            r#"<h1>{track}</h1>
<p class="sub">Processing complete</p>
<div class="card"><h3>Combined MIDI</h3><ul>{combined}</ul></div>
<div class="card"><h3>Per-stem MIDI</h3><ul>{midi}</ul></div>
<div class="card"><h3>Separated stems</h3><ul>{stems}</ul></div>
<p><a href="/">Process another file</a></p>"#,
            track = escape(&bundle.track_name),
        ),
    )
}
