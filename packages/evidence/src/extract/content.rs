//! Boilerplate removal with preserved heading context.

use scraper::{ElementRef, Html, Selector};

/// A run of cleaned text under one heading.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub heading: Option<String>,
    pub text: String,
}

impl Section {
    /// A section for non-HTML content (abstracts, plain text).
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            heading: None,
            text: text.into(),
        }
    }
}

const BOILERPLATE_TAGS: &[&str] = &["nav", "footer", "header", "aside", "script", "style", "form"];

fn inside_boilerplate(element: &ElementRef) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .map(|e| BOILERPLATE_TAGS.contains(&e.name()))
            .unwrap_or(false)
    })
}

fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The document title, if any.
pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    let title = document
        .select(&selector)
        .next()
        .map(|e| element_text(&e))?;
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// Strip boilerplate and return content runs in document order, each tagged
/// with the nearest preceding heading.
pub fn extract_content(html: &str) -> Vec<Section> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("h1, h2, h3, h4, h5, h6, p, li, blockquote, td") else {
        return Vec::new();
    };

    let mut sections: Vec<Section> = Vec::new();
    let mut current_heading: Option<String> = None;

    for element in document.select(&selector) {
        if inside_boilerplate(&element) {
            continue;
        }
        let name = element.value().name();
        let text = element_text(&element);
        if text.is_empty() {
            continue;
        }

        if name.starts_with('h') && name.len() == 2 {
            current_heading = Some(text);
            continue;
        }

        // Merge consecutive runs under the same heading.
        match sections.last_mut() {
            Some(last) if last.heading == current_heading => {
                last.text.push(' ');
                last.text.push_str(&text);
            }
            _ => sections.push(Section {
                heading: current_heading.clone(),
                text,
            }),
        }
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html>
          <head><title>Trial results</title></head>
          <body>
            <nav><a href="/">Home</a><p>Menu item</p></nav>
            <h1>Effects of X on Y</h1>
            <p>X reduced Y by 0.5 in the treatment group.</p>
            <h2>Methods</h2>
            <p>We enrolled 120 participants.</p>
            <p>Follow-up lasted two years.</p>
            <footer><p>Copyright 2024</p></footer>
          </body>
        </html>
    "#;

    #[test]
    fn title_is_extracted() {
        assert_eq!(extract_title(PAGE).as_deref(), Some("Trial results"));
        assert_eq!(extract_title("<html><body><p>x</p></body></html>"), None);
    }

    #[test]
    fn boilerplate_is_dropped() {
        let sections = extract_content(PAGE);
        let all: String = sections.iter().map(|s| s.text.clone()).collect();
        assert!(!all.contains("Menu item"));
        assert!(!all.contains("Copyright"));
    }

    #[test]
    fn heading_context_follows_the_document() {
        let sections = extract_content(PAGE);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading.as_deref(), Some("Effects of X on Y"));
        assert!(sections[0].text.contains("reduced Y by 0.5"));
        assert_eq!(sections[1].heading.as_deref(), Some("Methods"));
        assert!(sections[1].text.contains("120 participants"));
        assert!(sections[1].text.contains("two years"));
    }

    #[test]
    fn empty_documents_yield_no_sections() {
        assert!(extract_content("<html><body></body></html>").is_empty());
    }
}
