use crate::predict::PredictError;

pub const TITLE: &str = "Diabetica Medical Assistant";
pub const DESCRIPTION: &str =
    "Ask questions about diabetes and get responses from our medical AI assistant.";
pub const PLACEHOLDER: &str = "Ask your question about diabetes...";
pub const OUTPUT_LABEL: &str = "Response";

pub const EXAMPLES: [&str; 3] = [
    "What are the early symptoms of diabetes?",
    "How is Type 2 diabetes diagnosed?",
    "What lifestyle changes can help manage diabetes?",
];

/// The only place a prediction failure becomes user-facing text.
pub fn render_outcome(outcome: &Result<String, PredictError>) -> String {
    match outcome {
        Ok(answer) => answer.clone(),
        Err(e) => format!("Error processing request: {e}"),
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Renders the whole page. `input` prefills the question box, `output` fills
/// the response box.
pub fn render_page(input: &str, output: Option<&str>) -> String {
    let examples: String = EXAMPLES
        .iter()
        .map(|q| {
            format!(
                r#"<li><a class="example" href="/?text={}">{}</a></li>"#,
                urlencoding::encode(q),
                escape_html(q)
            )
        })
        .collect::<Vec<_>>()
        .join("\n                ");

    format!(
        r#"<!doctype html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <meta name="viewport" content="width=device-width, initial-scale=1" />
        <title>{title}</title>
        <style>
            :root {{
                --bg: #f6f2ea;
                --ink: #1b1b1b;
                --accent: #0d5c63;
                --card: #ffffff;
                --muted: #6b6b6b;
            }}
            * {{ box-sizing: border-box; }}
            body {{
                margin: 0;
                font-family: system-ui, sans-serif;
                color: var(--ink);
                background: var(--bg);
            }}
            main {{ max-width: 760px; margin: 0 auto; padding: 32px; }}
            h1 {{ margin: 0 0 8px; }}
            p.description {{ color: var(--muted); margin: 0 0 24px; }}
            .card {{
                background: var(--card);
                border-radius: 12px;
                padding: 20px;
                margin-bottom: 16px;
                box-shadow: 0 1px 3px rgba(0, 0, 0, 0.08);
            }}
            label {{ display: block; font-weight: 600; margin-bottom: 6px; }}
            textarea, output {{
                width: 100%;
                font: inherit;
                padding: 10px;
                border: 1px solid #d8d2c8;
                border-radius: 8px;
            }}
            output {{ display: block; min-height: 3em; white-space: pre-wrap; }}
            button {{
                margin-top: 12px;
                background: var(--accent);
                color: #fff;
                border: 0;
                border-radius: 8px;
                padding: 10px 18px;
                font: inherit;
                cursor: pointer;
            }}
            button:disabled {{ opacity: 0.6; cursor: wait; }}
            ul.examples {{ padding-left: 18px; margin: 0; }}
            a.example {{ color: var(--accent); }}
        </style>
    </head>
    <body>
        <main>
            <h1>{title}</h1>
            <p class="description">{description}</p>
            <form class="card" method="post" action="/" id="ask">
                <label for="text">Question</label>
                <textarea id="text" name="text" rows="3" placeholder="{placeholder}">
{input}</textarea>
                <button type="submit" id="submit">Submit</button>
            </form>
            <section class="card">
                <label for="response">{output_label}</label>
                <output id="response" for="text">{output}</output>
            </section>
            <section class="card">
                <label>Examples</label>
                <ul class="examples">
                {examples}
                </ul>
            </section>
        </main>
        <script>
            document.getElementById("ask").addEventListener("submit", function () {{
                var btn = document.getElementById("submit");
                btn.disabled = true;
                btn.textContent = "Waiting...";
            }});
        </script>
    </body>
</html>
"#,
        title = escape_html(TITLE),
        description = escape_html(DESCRIPTION),
        placeholder = escape_html(PLACEHOLDER),
        output_label = escape_html(OUTPUT_LABEL),
        input = escape_html(input),
        output = escape_html(output.unwrap_or("")),
        examples = examples,
    )
}
