//! Page documents.
//!
//! A page is a tree `Page → Section → Row → Column → ContentItem`. Only the
//! fields the migration needs are typed; everything else on every node is
//! carried through `extra` so a rewritten page loses nothing.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    #[serde(default)]
    pub contents: Vec<ContentItem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One module in a column.
///
/// `type` and `value` are kept as found, including explicit `null`s and
/// shapes this tool does not understand, so a rewrite changes nothing but
/// the replaced URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(
        rename = "type",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<ContentKind>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Distinguishes a present `null` from an absent field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl ContentItem {
    pub fn is_video(&self) -> bool {
        matches!(self.kind, Some(ContentKind::Video(_)))
    }

    /// The item's value when it is a plain string.
    pub fn url(&self) -> Option<&str> {
        self.value.as_ref().and_then(Value::as_str)
    }

    pub fn enabled(&self) -> Option<bool> {
        self.extra.get("enabled").and_then(Value::as_bool)
    }
}

/// Module type. Normally a single-key object such as `{"video": {}}`; any
/// object carrying a `video` key counts as a video module.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentKind {
    /// The whole type object, kept verbatim.
    Video(Map<String, Value>),
    /// Anything else, including non-object types.
    Other(Value),
}

impl ContentKind {
    /// The first key of the type object, e.g. `video` or `text`.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Video(_) => Some("video"),
            Self::Other(Value::Object(map)) => map.keys().next().map(String::as_str),
            Self::Other(_) => None,
        }
    }
}

impl Serialize for ContentKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Video(map) => map.serialize(serializer),
            Self::Other(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ContentKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Object(map) if map.contains_key("video") => Self::Video(map),
            other => Self::Other(other),
        })
    }
}

/// Read-only walk over every content item.
pub trait ContentVisitor {
    fn visit_content(&mut self, item: &ContentItem);
}

/// Mutating walk over every content item.
pub trait ContentVisitorMut {
    fn visit_content_mut(&mut self, item: &mut ContentItem);
}

impl Page {
    pub fn accept<V: ContentVisitor>(&self, visitor: &mut V) {
        for section in &self.sections {
            for row in &section.rows {
                for column in &row.columns {
                    for item in &column.contents {
                        visitor.visit_content(item);
                    }
                }
            }
        }
    }

    pub fn accept_mut<V: ContentVisitorMut>(&mut self, visitor: &mut V) {
        for section in &mut self.sections {
            for row in &mut section.rows {
                for column in &mut row.columns {
                    for item in &mut column.contents {
                        visitor.visit_content_mut(item);
                    }
                }
            }
        }
    }

    /// Values of every video item, in document order.
    pub fn video_urls(&self) -> Vec<String> {
        struct Collect(Vec<String>);
        impl ContentVisitor for Collect {
            fn visit_content(&mut self, item: &ContentItem) {
                if let (true, Some(url)) = (item.is_video(), item.url()) {
                    self.0.push(url.to_string());
                }
            }
        }

        let mut collect = Collect(Vec::new());
        self.accept(&mut collect);
        collect.0
    }

    /// Point every video item whose value is exactly `old` at `new`.
    /// Returns the number of items changed.
    pub fn replace_video_url(&mut self, old: &str, new: &str) -> usize {
        struct Replace<'a> {
            old: &'a str,
            new: &'a str,
            count: usize,
        }
        impl ContentVisitorMut for Replace<'_> {
            fn visit_content_mut(&mut self, item: &mut ContentItem) {
                if item.is_video() && item.url() == Some(self.old) {
                    item.value = Some(Value::String(self.new.to_string()));
                    self.count += 1;
                }
            }
        }

        if old == new {
            return 0;
        }
        let mut replace = Replace { old, new, count: 0 };
        self.accept_mut(&mut replace);
        replace.count
    }

    /// Page title from the `micro` summary, when present.
    pub fn title(&self) -> Option<&str> {
        self.extra
            .get("micro")
            .and_then(|micro| micro.get("title"))
            .and_then(Value::as_str)
    }
}
