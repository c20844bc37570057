//! JavaScript snippets evaluated in the page.
//!
//! Every caller-supplied string is passed through [`sanitize_js_string`]
//! before it is spliced into a script.

/// Build a script that clicks the first visible clickable element whose text
/// (or aria-label/title) contains one of `labels`, tried in order.
///
/// Evaluates to `{ clicked: bool, label: string|null, text: string|null }`.
pub fn build_click_script(labels: &[&str]) -> String {
    let list = labels
        .iter()
        .map(|l| format!("'{}'", sanitize_js_string(&l.to_lowercase())))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"(() => {{
            const labels = [{list}];
            const norm = (s) => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
            const visible = (el) => {{
                const r = el.getBoundingClientRect();
                const st = window.getComputedStyle(el);
                return r.width > 0 && r.height > 0 && st.visibility !== 'hidden' && st.display !== 'none';
            }};
            const els = [...document.querySelectorAll('a, button, [role="button"], input[type="button"], input[type="submit"]')]
                .filter(visible);
            for (const label of labels) {{
                for (const el of els) {{
                    const text = norm(el.innerText || el.value || el.getAttribute('aria-label') || el.getAttribute('title'));
                    if (text.includes(label)) {{
                        el.click();
                        return {{ clicked: true, label: label, text: text }};
                    }}
                }}
            }}
            return {{ clicked: false, label: null, text: null }};
        }})()"#
    )
}

/// Evaluates to `true` when the visible page text contains `needle`
/// (case-insensitive).
pub fn build_text_present_script(needle: &str) -> String {
    format!(
        r#"(() => {{
            const body = document.body ? document.body.innerText : '';
            return body.toLowerCase().includes('{}');
        }})()"#,
        sanitize_js_string(&needle.to_lowercase())
    )
}

/// Every anchor pointing at a mod page, in document order.
///
/// Evaluates to `[{ href: string, text: string }]`.
pub const COLLECTION_LINKS_SCRIPT: &str = r#"(() => {
    return [...document.querySelectorAll("a[href*='/mods/']")].map((a) => ({
        href: a.href,
        text: (a.innerText || a.getAttribute('title') || '').replace(/\s+/g, ' ').trim()
    }));
})()"#;

pub const SCROLL_TO_BOTTOM_SCRIPT: &str =
    "(() => { window.scrollTo(0, document.body ? document.body.scrollHeight : 0); return true; })()";

pub const SCROLL_TO_TOP_SCRIPT: &str = "(() => { window.scrollTo(0, 0); return true; })()";

pub const TITLE_SCRIPT: &str = "document.title";

/// Sanitize a string for safe embedding in a single-quoted JavaScript
/// literal. Escapes quotes and backslashes, strips null bytes, and encodes
/// angle brackets so `</script>` cannot appear.
pub fn sanitize_js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\0' => {}
            '<' => result.push_str("\\x3c"),
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result
}
