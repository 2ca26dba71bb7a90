//! XML document parsing utilities.
//!
//! Uses quick-xml which is safe against XXE by default (doesn't expand entities).
//! Documents are parsed into a small owned element tree that the transcript
//! and the response decoder walk.

use crate::error::{Result, SoapError};
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use regex::Regex;

/// SOAP namespace URIs.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// SOAP protocol version, detected from the envelope namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapVersion {
    Soap11,
    Soap12,
}

/// An owned XML element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    /// Qualified name as written (`prefix:local`)
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Concatenated, unescaped text content
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }

    /// Attribute value by qualified or local name.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .or_else(|| self.attributes.iter().find(|(k, _)| local_part(k) == key))
            .map(|(_, v)| v.as_str())
    }

    /// Namespace declared on this element for `prefix` (or the default one).
    pub fn namespace_decl(&self, prefix: Option<&str>) -> Option<&str> {
        let key = match prefix {
            Some(p) => format!("xmlns:{}", p),
            None => "xmlns".to_string(),
        };
        self.attributes
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    fn matches(&self, name: &str) -> bool {
        self.name == name || self.local_name() == name
    }

    /// First direct child with the given qualified or local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.matches(name))
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.matches(name))
    }

    /// First descendant (depth-first) with the given name.
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        for child in &self.children {
            if child.matches(name) {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// Resolve a `/`-separated tag path. The first segment is searched among
    /// all descendants, later segments among direct children.
    pub fn find_path(&self, path: &str) -> Option<&XmlElement> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let first = segments.next()?;
        let mut current = if self.matches(first) {
            self
        } else {
            self.find(first)?
        };
        for segment in segments {
            current = current.child(segment)?;
        }
        Some(current)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn text(&self) -> &str {
        self.text.trim()
    }
}

/// Local part of a qualified name.
pub fn local_part(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Parse an XML document into an element tree.
pub fn parse_document(xml: &str) -> Result<XmlElement> {
    check_xxe_patterns(xml)?;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => stack.push(element_from(e)?),

            Ok(Event::Empty(ref e)) => {
                let element = element_from(e)?;
                attach(&mut stack, &mut root, element);
            }

            Ok(Event::End(_)) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }

            Ok(Event::Text(ref e)) => {
                if let Some(current) = stack.last_mut() {
                    let text = e
                        .unescape()
                        .map_err(|err| SoapError::XmlParse(format!("Invalid text: {}", err)))?;
                    current.text.push_str(&text);
                }
            }

            Ok(Event::CData(ref e)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(e));
                }
            }

            Ok(Event::Eof) => break,

            Err(e) => {
                return Err(SoapError::XmlParse(format!(
                    "XML parse error at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }

            _ => {}
        }

        buf.clear();
    }

    if !stack.is_empty() {
        return Err(SoapError::XmlParse(
            "Unexpected end of document".to_string(),
        ));
    }
    root.ok_or_else(|| SoapError::XmlParse("Document has no root element".to_string()))
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn element_from(e: &BytesStart) -> Result<XmlElement> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SoapError::XmlParse(format!("Invalid attribute: {}", err)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| SoapError::XmlParse(format!("Invalid attribute value: {}", err)))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(XmlElement {
        name,
        attributes,
        ..Default::default()
    })
}

/// Check for XXE attack patterns.
fn check_xxe_patterns(xml: &str) -> Result<()> {
    if xml.contains("<!DOCTYPE") || xml.contains("<!doctype") {
        return Err(SoapError::XmlParse(
            "DOCTYPE declarations are not allowed".to_string(),
        ));
    }

    if xml.contains("<!ENTITY") || xml.contains("<!entity") {
        return Err(SoapError::XmlParse(
            "Entity declarations are not allowed".to_string(),
        ));
    }

    Ok(())
}

/// SOAP version of a parsed envelope, or `None` if the root is not a SOAP
/// envelope.
pub fn envelope_version(root: &XmlElement) -> Option<SoapVersion> {
    if root.local_name() != "Envelope" {
        return None;
    }
    match root.namespace_decl(root.prefix())? {
        SOAP_11_NS => Some(SoapVersion::Soap11),
        SOAP_12_NS => Some(SoapVersion::Soap12),
        _ => None,
    }
}

static HTML_PAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<html[^>]*>.*?<body[^>]*>.*?</body>.*?</html>").unwrap()
});
static HTML_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title>(.*?)</title>").unwrap());
static HTML_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<body[^>]*>(.*)</body>").unwrap());
static HTML_DETAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<blockquote><h1>.*?</h1>(.*?)<p></blockquote>|<h1>.*?</h1>(.*?)</body>")
        .unwrap()
});
static HTML_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Whether a payload is an HTML page rather than protocol data.
pub fn is_html(data: &str) -> bool {
    HTML_PAGE.is_match(data)
}

/// Extract a readable error message from an HTML error page.
///
/// Uses the `<title>` text (without a leading `Error: `), or the `<body>`
/// text when there is no title, followed by the `<H1>` detail when present.
pub fn error_from_html(data: &str) -> Option<String> {
    let flat = data.replace('\n', "");

    let message = match HTML_TITLE.captures(&flat) {
        Some(caps) => {
            let title = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            title
                .trim()
                .trim_start_matches("Error: ")
                .trim_start_matches("ERROR: ")
                .to_string()
        }
        None => HTML_BODY
            .captures(&flat)
            .and_then(|caps| caps.get(1))
            .map(|m| strip_tags(m.as_str()).trim_end_matches('.').to_string())
            .unwrap_or_default(),
    };

    let detail = HTML_DETAIL
        .captures(&flat)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| strip_tags(m.as_str()).trim_matches('.').trim().to_string())
        .filter(|d| !d.is_empty() && *d != message)
        .unwrap_or_default();

    match (message.is_empty(), detail.is_empty()) {
        (true, _) => None,
        (false, true) => Some(format!("{}.", message)),
        (false, false) => Some(format!("{}. {}.", message, detail)),
    }
}

fn strip_tags(fragment: &str) -> String {
    let spaced = HTML_TAG.replace_all(fragment, " ");
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Re-indent an XML document for display. HTML and unparsable input are
/// returned unchanged.
pub fn pretty_print(xml: &str) -> String {
    if is_html(xml) {
        return xml.to_string();
    }
    reindent(xml).unwrap_or_else(|| xml.to_string())
}

fn reindent(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(event) => writer.write_event(event).ok()?,
            Err(_) => return None,
        }
        buf.clear();
    }

    String::from_utf8(writer.into_inner()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOAP_11_SAMPLE: &str = r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Header>
    <ResponseHeader xmlns="https://api.example.com/api/cm/v1">
      <requestId>abc123</requestId>
      <units>5</units>
    </ResponseHeader>
  </soap:Header>
  <soap:Body>
    <getResponse xmlns="https://api.example.com/api/cm/v1">
      <rval><name>A &amp; B</name></rval>
      <rval><name><![CDATA[<raw>]]></name></rval>
    </getResponse>
  </soap:Body>
</soap:Envelope>"#;

    const SOAP_12_SAMPLE: &str = r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope">
  <soap:Body>
    <m:GetUser xmlns:m="http://example.org/users">
      <m:UserId>123</m:UserId>
    </m:GetUser>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn test_parse_soap_11() {
        let root = parse_document(SOAP_11_SAMPLE).unwrap();
        assert_eq!(envelope_version(&root), Some(SoapVersion::Soap11));
        let response = root.find("getResponse").unwrap();
        let names: Vec<_> = response
            .children_named("rval")
            .map(|r| r.child("name").unwrap().text().to_string())
            .collect();
        assert_eq!(names, vec!["A & B", "<raw>"]);
    }

    #[test]
    fn test_parse_soap_12() {
        let root = parse_document(SOAP_12_SAMPLE).unwrap();
        assert_eq!(envelope_version(&root), Some(SoapVersion::Soap12));
        assert_eq!(root.find("GetUser").unwrap().name, "m:GetUser");
        assert_eq!(root.find("m:UserId").unwrap().text(), "123");
    }

    #[test]
    fn test_find_path() {
        let root = parse_document(SOAP_11_SAMPLE).unwrap();
        assert_eq!(
            root.find_path("Header/ResponseHeader/units").unwrap().text(),
            "5"
        );
        assert_eq!(root.find_path("requestId").unwrap().text(), "abc123");
        assert!(root.find_path("Header/units").is_none());
    }

    #[test]
    fn test_not_an_envelope() {
        let root = parse_document("<a><b>1</b></a>").unwrap();
        assert_eq!(envelope_version(&root), None);
    }

    #[test]
    fn test_xxe_detection() {
        let xxe_payload = r#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>&xxe;</soap:Body>
</soap:Envelope>"#;

        let result = parse_document(xxe_payload);
        assert!(matches!(result, Err(SoapError::XmlParse(_))));
    }

    #[test]
    fn test_malformed_document() {
        assert!(parse_document("<a><b></a>").is_err());
        assert!(parse_document("").is_err());
    }

    // --- HTML error pages ---

    const HTML_ERROR: &str = "<html>\n<head><title>Error: 502 Bad Gateway</title></head>\n<body><H1>Bad Gateway</H1>The server is down.</body></html>";

    #[test]
    fn test_is_html() {
        assert!(is_html(HTML_ERROR));
        assert!(is_html("<HTML><BODY bgcolor=white>x</BODY></HTML>"));
        assert!(!is_html(SOAP_11_SAMPLE));
    }

    #[test]
    fn test_error_from_html() {
        assert_eq!(
            error_from_html(HTML_ERROR).unwrap(),
            "502 Bad Gateway. The server is down."
        );
        assert_eq!(
            error_from_html("<html><body>Service unavailable.</body></html>").unwrap(),
            "Service unavailable."
        );
        assert_eq!(error_from_html("<html></html>"), None);
    }

    #[test]
    fn test_pretty_print() {
        let pretty = pretty_print("<a><b>1</b></a>");
        assert_eq!(pretty, "<a>\n  <b>1</b>\n</a>");
        assert_eq!(pretty_print("not <xml"), "not <xml");
        assert_eq!(pretty_print(HTML_ERROR), HTML_ERROR);
    }
}
