//! Server-rendered page shell.
//!
//! The page is static apart from the theme settings; conversation content
//! is filled in by the inline script from the session API and its SSE
//! notifications.

use crate::settings::Settings;

/// Example prompts shown above the conversation.
pub const PROMPT_TEMPLATES: &[(&str, &str)] = &[
    ("Explain", "Explain how a hash map works, with a short example."),
    ("Summarize", "Summarize the plot of Don Quixote in five sentences."),
    ("Translate", "Translate 'the request was cancelled' into Spanish and French."),
    ("Brainstorm", "Give me three names for a weekend hiking club."),
];

/// Accent colors offered in the settings menu.
pub const ACCENT_COLORS: &[&str] = &[
    "violet", "tomato", "crimson", "teal", "green", "orange", "blue", "gray",
];

/// Escape text for use inside HTML content or a quoted attribute.
#[must_use]
pub fn escape_html(text: &str) -> String {
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

/// Strip characters that could end a CSS string or declaration.
fn css_value(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '"' | '\'' | ';' | '{' | '}' | '<' | '>' | '\\'))
        .collect()
}

fn templates_html() -> String {
    PROMPT_TEMPLATES
        .iter()
        .map(|(label, prompt)| {
            format!(
                r#"<button type="button" class="template" data-prompt="{}">{}</button>"#,
                escape_html(prompt),
                escape_html(label)
            )
        })
        .collect::<Vec<_>>()
        .join("\n            ")
}

fn color_options_html(selected: &str) -> String {
    ACCENT_COLORS
        .iter()
        .map(|c| {
            let mark = if *c == selected { " selected" } else { "" };
            format!(r#"<option value="{c}"{mark}>{c}</option>"#)
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Render the chat page for the given theme.
#[must_use]
pub fn render_page(settings: &Settings) -> String {
    let font = css_value(&settings.font_family);
    let accent = css_value(&settings.color);
    let font_attr = escape_html(&settings.font_family);
    let templates = templates_html();
    let colors = color_options_html(&settings.color);

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="description" content="A streaming chatbot">
    <title>Chatbot</title>
    <style>
        :root {{
            --font-family: "{font}", sans-serif;
            --accent: {accent};
        }}
        body {{ margin: 0; font-family: var(--font-family); background: #111113; color: #eeeef0; }}
        .shell {{ display: flex; flex-direction: column; justify-content: space-between; gap: 2rem;
                  max-width: 56rem; height: 100vh; margin: 0 auto; padding: 4rem 1.5rem 1.5rem; box-sizing: border-box; }}
        .topbar {{ position: absolute; top: 1rem; right: 1rem; display: flex; gap: 0.75rem; align-items: center; }}
        .templates {{ display: flex; flex-wrap: wrap; gap: 0.5rem; justify-content: center; }}
        .template, .topbar button {{ border: 1px solid var(--accent); background: transparent; color: inherit;
                                      border-radius: 0.75rem; padding: 0.5rem 0.9rem; cursor: pointer; }}
        #history {{ flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 1rem; }}
        .question {{ align-self: flex-end; background: var(--accent); border-radius: 1rem; padding: 0.6rem 1rem; max-width: 80%; }}
        .answer {{ align-self: flex-start; background: #222225; border-radius: 1rem; padding: 0.6rem 1rem;
                   max-width: 80%; white-space: pre-wrap; }}
        .bar {{ display: flex; gap: 0.5rem; }}
        .bar textarea {{ flex: 1; resize: none; border-radius: 1rem; padding: 0.8rem 1rem; font: inherit;
                         background: #18181b; color: inherit; border: 1px solid #333; }}
        .bar button {{ border: none; border-radius: 1rem; padding: 0 1.2rem; background: var(--accent); color: white; cursor: pointer; }}
        .bar button:disabled {{ opacity: 0.5; cursor: not-allowed; }}
        body.has-history .templates {{ display: none; }}
    </style>
</head>
<body>
    <div class="topbar">
        <button type="button" id="reset" title="Clear conversation">Reset</button>
        <select id="color" aria-label="Accent color">{colors}</select>
        <input id="font" aria-label="Font family" value="{font_attr}" size="10">
    </div>
    <div class="shell">
        <div class="templates">
            {templates}
        </div>
        <div id="history"></div>
        <form class="bar" id="bar">
            <textarea id="question" rows="1" placeholder="Ask something..." maxlength="500"></textarea>
            <button type="submit" id="send">Send</button>
        </form>
    </div>
    <script>
    (() => {{
        const history = document.getElementById('history');
        const question = document.getElementById('question');
        const send = document.getElementById('send');
        let sessionId = null;
        let turns = [];

        const post = (path, body) => fetch(`/api/sessions/${{sessionId}}${{path}}`, {{
            method: 'POST',
            headers: {{ 'Content-Type': 'application/json' }},
            body: JSON.stringify(body || {{}}),
        }});

        function render() {{
            history.replaceChildren();
            for (const turn of turns) {{
                const q = document.createElement('div');
                q.className = 'question';
                q.textContent = turn.user;
                const a = document.createElement('div');
                a.className = 'answer';
                a.textContent = turn.assistant;
                history.append(q, a);
            }}
            document.body.classList.toggle('has-history', turns.length > 0);
            history.scrollTop = history.scrollHeight;
        }}

        function setProcessing(flag) {{
            send.disabled = flag;
            send.textContent = flag ? '...' : 'Send';
        }}

        function load(snapshot) {{
            turns = snapshot.turns;
            setProcessing(snapshot.processing);
            render();
        }}

        function listen() {{
            const es = new EventSource(`/api/sessions/${{sessionId}}/events`);
            const on = (name, fn) => es.addEventListener(name, e => fn(JSON.parse(e.data).data));
            // The server ends the stream when the session goes away; reattach.
            es.onerror = () => {{
                es.close();
                setTimeout(start, 1000);
            }};
            on('snapshot', load);
            on('processing', d => setProcessing(d.processing));
            on('turn.started', d => {{ turns.push({{ user: d.user, assistant: '' }}); render(); }});
            on('history.evicted', d => {{ turns.splice(0, d.count); render(); }});
            on('turn.delta', d => {{
                if (!turns.length) return;
                turns[turns.length - 1].assistant += d.text;
                history.lastElementChild.textContent = turns[turns.length - 1].assistant;
                history.scrollTop = history.scrollHeight;
            }});
            on('turn.finished', d => {{
                if (turns.length) turns[turns.length - 1].assistant = d.assistant;
                render();
            }});
            on('history.cleared', () => {{ turns = []; render(); }});
            on('input.changed', d => {{ if (d.text === '') question.value = ''; }});
        }}

        async function start() {{
            sessionId = sessionStorage.getItem('streamchat.session') || crypto.randomUUID();
            const res = await fetch(`/api/sessions/${{sessionId}}`, {{ method: 'PUT' }});
            const info = await res.json();
            sessionStorage.setItem('streamchat.session', sessionId);
            load(info.conversation);
            listen();
        }}

        question.addEventListener('keydown', e => {{
            if (e.key === 'Enter' && !e.shiftKey) {{
                e.preventDefault();
                post('/key', {{ key: e.key, input: question.value }});
            }}
        }});
        document.getElementById('bar').addEventListener('submit', e => {{
            e.preventDefault();
            post('/submit', {{ message: question.value }});
        }});
        document.getElementById('reset').addEventListener('click', () => post('/clear'));
        for (const t of document.querySelectorAll('.template')) {{
            t.addEventListener('click', () => {{ question.value = t.dataset.prompt; question.focus(); }});
        }}

        const saveSettings = body => fetch('/api/settings', {{
            method: 'PUT',
            headers: {{ 'Content-Type': 'application/json' }},
            body: JSON.stringify(body),
        }});
        document.getElementById('color').addEventListener('change', e => {{
            document.documentElement.style.setProperty('--accent', e.target.value);
            saveSettings({{ color: e.target.value }});
        }});
        document.getElementById('font').addEventListener('change', e => {{
            document.documentElement.style.setProperty('--font-family', `"${{e.target.value}}", sans-serif`);
            saveSettings({{ font_family: e.target.value }});
        }});

        start();
    }})();
    </script>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<b a="1">&'"#),
            "&lt;b a=&quot;1&quot;&gt;&amp;&#39;"
        );
    }

    #[test]
    fn test_page_uses_settings() {
        let page = render_page(&Settings {
            color: "teal".to_string(),
            font_family: "Inter".to_string(),
        });
        assert!(page.contains(r#"--font-family: "Inter", sans-serif;"#));
        assert!(page.contains("--accent: teal;"));
        assert!(page.contains(r#"<option value="teal" selected>"#));
    }

    #[test]
    fn test_page_neutralizes_hostile_font() {
        let page = render_page(&Settings {
            color: "violet".to_string(),
            font_family: r#"x"; } </style><script>alert(1)</script>"#.to_string(),
        });
        assert!(!page.contains("<script>alert(1)"));
    }

    #[test]
    fn test_page_lists_templates() {
        let page = render_page(&Settings::default());
        for (label, _) in PROMPT_TEMPLATES {
            assert!(page.contains(label));
        }
    }

    #[test]
    fn test_page_attaches_to_its_session() {
        let page = render_page(&Settings::default());
        assert!(page.contains("fetch(`/api/sessions/${sessionId}`, { method: 'PUT' })"));
        assert!(page.contains("setTimeout(start, 1000)"));
    }
}
