//! Markdown dialect conversion for the tracker and the wiki.
//!
//! One generated Markdown body feeds both targets. Each target gets a
//! best-effort swap driven by an ordered table of regex rules: headings,
//! fenced code, emphasis, links, lists. This is not a Markdown parser and
//! will mis-convert unusual input (nested emphasis, markers inside inline
//! code). Fenced code blocks are lifted out before the inline rules run so
//! their contents survive untouched.
//!
//! A real parser can replace a table by implementing [`DialectConverter`].

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Marks a lifted code block inside the text being converted.
const BLOCK_MARK: char = '\u{2}';
/// Stand-in for `*` so later emphasis rules do not re-read emitted stars.
const STAR_MARK: &str = "\u{1}";

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^```[ \t]*([\w+#.-]*)[^\n]*\n(.*?)^```[ \t]*$")
        .expect("FENCE_RE regex should compile")
});
static BLOCK_MARK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x02(\d+)\x02").expect("BLOCK_MARK_RE regex should compile"));

/// Converts Markdown into one target's markup.
pub trait DialectConverter: Send + Sync {
    /// Dialect name for logs.
    fn name(&self) -> &str;

    /// Convert a Markdown document.
    fn convert(&self, markdown: &str) -> String;

    /// Markup that displays an attachment of this artifact inline.
    fn image_embed(&self, filename: &str) -> String;

    /// Markup for a hyperlink.
    fn link(&self, text: &str, url: &str) -> String;
}

type Render = Box<dyn Fn(&Captures<'_>) -> String + Send + Sync>;

/// One regex substitution.
pub struct Rule {
    name: &'static str,
    pattern: Regex,
    render: Render,
}

impl Rule {
    /// Rule whose replacement is computed from the captures.
    pub fn new(
        name: &'static str,
        pattern: &str,
        render: impl Fn(&Captures<'_>) -> String + Send + Sync + 'static,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            pattern: Regex::new(pattern)?,
            render: Box::new(render),
        })
    }

    /// Rule with a `${n}` replacement template.
    pub fn template(
        name: &'static str,
        pattern: &str,
        template: &'static str,
    ) -> Result<Self, regex::Error> {
        Self::new(name, pattern, move |caps| {
            let mut out = String::new();
            caps.expand(template, &mut out);
            out
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn apply(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, |caps: &Captures<'_>| (self.render)(caps))
            .into_owned()
    }
}

/// Ordered rule table plus the renderers for code blocks, images and links.
pub struct RuleTable {
    name: String,
    rules: Vec<Rule>,
    code_block: fn(&str, &str) -> String,
    image: fn(&str) -> String,
    link: fn(&str, &str) -> String,
}

impl RuleTable {
    pub fn new(
        name: impl Into<String>,
        code_block: fn(&str, &str) -> String,
        image: fn(&str) -> String,
        link: fn(&str, &str) -> String,
    ) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            code_block,
            image,
            link,
        }
    }

    /// Append a rule; rules run in insertion order.
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(Rule::name).collect()
    }

    /// Jira wiki markup.
    pub fn jira() -> Self {
        Self::new("jira-wiki", jira_code_block, jira_image, jira_link)
            .with_rule(builtin(Rule::template(
                "hr",
                r"(?m)^[ \t]*(?:-{3,}|\*{3,}|_{3,})[ \t]*$",
                "----",
            )))
            .with_rule(builtin(Rule::new("heading", HEADING, |c| {
                format!("h{}. {}", c[1].len(), &c[2])
            })))
            .with_rule(builtin(Rule::template("quote", r"(?m)^>[ \t]?(.*)$", "bq. ${1}")))
            .with_rule(builtin(Rule::new("bullet", BULLET, |c| {
                format!("{} ", STAR_MARK.repeat(list_depth(&c[1])))
            })))
            .with_rule(builtin(Rule::new("numbered", NUMBERED, |c| {
                format!("{} ", "#".repeat(list_depth(&c[1])))
            })))
            .with_rule(builtin(Rule::template("image", IMAGE, "!${2}!")))
            .with_rule(builtin(Rule::template("link", LINK, "[${1}|${2}]")))
            .with_rule(builtin(Rule::template("bold", r"\*\*(.+?)\*\*", "\u{1}${1}\u{1}")))
            .with_rule(builtin(Rule::template("bold_underscore", r"__(.+?)__", "\u{1}${1}\u{1}")))
            .with_rule(builtin(Rule::template("italic", r"\*([^*\n]+)\*", "_${1}_")))
            .with_rule(builtin(Rule::template("strike", r"~~(.+?)~~", "-${1}-")))
            .with_rule(builtin(Rule::template("inline_code", r"`([^`\n]+)`", "{{${1}}}")))
            .with_rule(builtin(Rule::template("stars", r"\x01", "*")))
    }

    /// Confluence storage format (XHTML with `ac:` macros).
    pub fn confluence() -> Self {
        Self::new(
            "confluence-storage",
            confluence_code_block,
            confluence_image,
            confluence_link,
        )
        .with_rule(builtin(Rule::template("escape_amp", "&", "&amp;")))
        .with_rule(builtin(Rule::template("escape_lt", "<", "&lt;")))
        .with_rule(builtin(Rule::template(
            "hr",
            r"(?m)^[ \t]*(?:-{3,}|\*{3,}|_{3,})[ \t]*$",
            "<hr />",
        )))
        .with_rule(builtin(Rule::new("heading", HEADING, |c| {
            let level = c[1].len();
            format!("<h{level}>{}</h{level}>", &c[2])
        })))
        .with_rule(builtin(Rule::template(
            "quote",
            r"(?m)^>[ \t]?(.*)$",
            "<blockquote><p>${1}</p></blockquote>",
        )))
        .with_rule(builtin(Rule::template(
            "bullet",
            r"(?m)^[ \t]*[-+*][ \t]+(.*)$",
            "<li>${1}</li>",
        )))
        .with_rule(builtin(Rule::new("bullet_list", r"(?m)(?:^<li>.*</li>(?:\n|$))+", |c| {
            format!("<ul>{}</ul>\n", c[0].trim_end_matches('\n'))
        })))
        .with_rule(builtin(Rule::template(
            "numbered",
            r"(?m)^[ \t]*\d+[.)][ \t]+(.*)$",
            "<oli>${1}</oli>",
        )))
        .with_rule(builtin(Rule::new("numbered_list", r"(?m)(?:^<oli>.*</oli>(?:\n|$))+", |c| {
            let items = c[0]
                .trim_end_matches('\n')
                .replace("<oli>", "<li>")
                .replace("</oli>", "</li>");
            format!("<ol>{items}</ol>\n")
        })))
        .with_rule(builtin(Rule::template(
            "image",
            IMAGE,
            "<ac:image><ri:url ri:value=\"${2}\" /></ac:image>",
        )))
        .with_rule(builtin(Rule::template("link", LINK, "<a href=\"${2}\">${1}</a>")))
        .with_rule(builtin(Rule::template("bold", r"\*\*(.+?)\*\*", "<strong>${1}</strong>")))
        .with_rule(builtin(Rule::template("bold_underscore", r"__(.+?)__", "<strong>${1}</strong>")))
        .with_rule(builtin(Rule::template("italic", r"\*([^*\n]+)\*", "<em>${1}</em>")))
        .with_rule(builtin(Rule::template("italic_underscore", r"\b_([^_\n]+)_\b", "<em>${1}</em>")))
        .with_rule(builtin(Rule::template("strike", r"~~(.+?)~~", "<del>${1}</del>")))
        .with_rule(builtin(Rule::template("inline_code", r"`([^`\n]+)`", "<code>${1}</code>")))
        .with_rule(builtin(Rule::new("paragraph", r"(?m)^(.+)$", |c| {
            let line = &c[1];
            if is_block_line(line) {
                line.to_string()
            } else {
                format!("<p>{line}</p>")
            }
        })))
    }
}

impl DialectConverter for RuleTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn convert(&self, markdown: &str) -> String {
        let normalized = markdown.replace("\r\n", "\n");

        let mut blocks = Vec::new();
        let mut text = FENCE_RE
            .replace_all(&normalized, |caps: &Captures<'_>| {
                let lang = caps.get(1).map_or("", |m| m.as_str());
                let body = caps.get(2).map_or("", |m| m.as_str());
                blocks.push((self.code_block)(lang, body));
                format!("{BLOCK_MARK}{}{BLOCK_MARK}", blocks.len() - 1)
            })
            .into_owned();

        for rule in &self.rules {
            text = rule.apply(&text);
        }

        BLOCK_MARK_RE
            .replace_all(&text, |caps: &Captures<'_>| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| blocks.get(i).cloned())
                    .unwrap_or_default()
            })
            .into_owned()
    }

    fn image_embed(&self, filename: &str) -> String {
        (self.image)(filename)
    }

    fn link(&self, text: &str, url: &str) -> String {
        (self.link)(text, url)
    }
}

const HEADING: &str = r"(?m)^(#{1,6})[ \t]+(.+?)[ \t]*#*[ \t]*$";
const BULLET: &str = r"(?m)^([ \t]*)[-+*][ \t]+";
const NUMBERED: &str = r"(?m)^([ \t]*)\d+[.)][ \t]+";
const IMAGE: &str = r#"!\[([^\]]*)\]\(([^)\s]+)(?:[ \t]+"[^"]*")?\)"#;
const LINK: &str = r#"\[([^\]]+)\]\(([^)\s]+)(?:[ \t]+"[^"]*")?\)"#;

/// Built-in patterns are literals; a failure here is a programming error.
fn builtin(rule: Result<Rule, regex::Error>) -> Rule {
    rule.expect("built-in markup rule should compile")
}

/// Nesting depth from leading indentation, two columns per level.
fn list_depth(indent: &str) -> usize {
    let width: usize = indent.chars().map(|c| if c == '\t' { 2 } else { 1 }).sum();
    width / 2 + 1
}

fn is_block_line(line: &str) -> bool {
    const BLOCK_PREFIXES: [&str; 11] = [
        "<h", "<ul", "<ol", "<li", "</ul", "</ol", "<blockquote", "<hr", "<p>", "<ac:", "<table",
    ];
    let trimmed = line.trim_start();
    trimmed.starts_with(BLOCK_MARK) || BLOCK_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

fn jira_code_block(lang: &str, body: &str) -> String {
    if lang.is_empty() {
        format!("{{code}}\n{body}{{code}}")
    } else {
        format!("{{code:{lang}}}\n{body}{{code}}")
    }
}

fn jira_image(filename: &str) -> String {
    format!("!{filename}|thumbnail!")
}

fn jira_link(text: &str, url: &str) -> String {
    format!("[{text}|{url}]")
}

fn confluence_code_block(lang: &str, body: &str) -> String {
    let language = if lang.is_empty() {
        String::new()
    } else {
        format!("<ac:parameter ac:name=\"language\">{}</ac:parameter>", escape_xml(lang))
    };
    // "]]>" cannot appear inside CDATA; split it across two sections.
    let body = body.replace("]]>", "]]]]><![CDATA[>");
    format!(
        "<ac:structured-macro ac:name=\"code\">{language}<ac:plain-text-body><![CDATA[{body}]]></ac:plain-text-body></ac:structured-macro>"
    )
}

fn confluence_image(filename: &str) -> String {
    format!(
        "<p><ac:image ac:width=\"600\"><ri:attachment ri:filename=\"{}\" /></ac:image></p>",
        escape_xml(filename)
    )
}

fn confluence_link(text: &str, url: &str) -> String {
    format!("<a href=\"{}\">{}</a>", escape_xml(url), escape_xml(text))
}

/// Escape text for XHTML attribute or element content.
pub fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# LoginButton\n\
        \n\
        A **primary** button with *hover* state.\n\
        \n\
        ## Props\n\
        - `variant`: primary\n\
        - see [Figma](https://figma.com/file/abc)\n\
        \n\
        ```tsx\n\
        # not a heading\n\
        <Button **raw** />\n\
        ```\n";

    #[test]
    fn test_jira_conversion() {
        let out = RuleTable::jira().convert(SAMPLE);
        assert!(out.contains("h1. LoginButton"));
        assert!(out.contains("h2. Props"));
        assert!(out.contains("A *primary* button with _hover_ state."));
        assert!(out.contains("* {{variant}}: primary"));
        assert!(out.contains("[Figma|https://figma.com/file/abc]"));
        assert!(out.contains("{code:tsx}\n# not a heading\n<Button **raw** />\n{code}"));
    }

    #[test]
    fn test_confluence_conversion() {
        let out = RuleTable::confluence().convert(SAMPLE);
        assert!(out.contains("<h1>LoginButton</h1>"));
        assert!(out.contains("<p>A <strong>primary</strong> button with <em>hover</em> state.</p>"));
        assert!(out.contains("<ul><li><code>variant</code>: primary</li>\n<li>see <a href=\"https://figma.com/file/abc\">Figma</a></li></ul>"));
        assert!(out.contains("<ac:parameter ac:name=\"language\">tsx</ac:parameter>"));
        // Code survives escaping and emphasis rules.
        assert!(out.contains("<![CDATA[# not a heading\n<Button **raw** />\n]]>"));
    }

    #[test]
    fn test_nested_jira_lists() {
        let out = RuleTable::jira().convert("- one\n  - two\n1. first\n   2. second\n");
        assert!(out.contains("* one\n** two\n# first\n## second"));
    }

    #[test]
    fn test_confluence_numbered_list_and_escaping() {
        let out = RuleTable::confluence().convert("1. a < b & c\n2. done\n");
        assert!(out.contains("<ol><li>a &lt; b &amp; c</li>\n<li>done</li></ol>"));
    }

    #[test]
    fn test_code_block_without_language() {
        let out = RuleTable::jira().convert("```\nlet x = 1;\n```");
        assert_eq!(out, "{code}\nlet x = 1;\n{code}");
    }

    #[test]
    fn test_cdata_terminator_split() {
        let out = confluence_code_block("", "a ]]> b\n");
        assert!(out.contains("a ]]]]><![CDATA[> b"));
    }

    #[test]
    fn test_embeds() {
        let jira = RuleTable::jira();
        assert_eq!(jira.image_embed("shot.png"), "!shot.png|thumbnail!");
        assert_eq!(jira.link("Spec", "https://w/1"), "[Spec|https://w/1]");

        let wiki = RuleTable::confluence();
        assert!(wiki
            .image_embed("a&b.png")
            .contains("ri:filename=\"a&amp;b.png\""));
    }

    #[test]
    fn test_custom_table_is_pluggable() {
        let table = RuleTable::new("shout", jira_code_block, jira_image, jira_link)
            .with_rule(Rule::new("upper", r"(?m)^(.+)$", |c| c[1].to_uppercase()).unwrap());
        let converter: &dyn DialectConverter = &table;
        assert_eq!(converter.convert("hello\nworld"), "HELLO\nWORLD");
        assert_eq!(table.rule_names(), vec!["upper"]);
    }
}
