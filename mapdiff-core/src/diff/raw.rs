//! Raw change batch as decoded from the wire payload.
//!
//! The shape mirrors an `osmChange` document: an ordered list of action
//! blocks, each holding ordered groups of elements of one type. Nothing here
//! is validated; see [`crate::parse_batch`].

/// A whole upload, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct RawChangeBatch {
    /// Action blocks in document order.
    pub blocks: Vec<RawActionBlock>,
}

impl RawChangeBatch {
    /// Append an element, opening a new block or group when the action or
    /// type differs from the previous element.
    ///
    /// # Examples
    /// ```
    /// use mapdiff_core::{RawChangeBatch, RawElement};
    ///
    /// let batch = RawChangeBatch::default()
    ///     .with("create", "node", RawElement::node(-1, 51.5, -0.1))
    ///     .with("create", "node", RawElement::node(-2, 51.6, -0.1))
    ///     .with("create", "way", RawElement::way(-1, vec![-1, -2]));
    /// assert_eq!(batch.blocks.len(), 1);
    /// assert_eq!(batch.blocks[0].groups.len(), 2);
    /// ```
    #[must_use]
    pub fn with(mut self, action: &str, element_type: &str, element: RawElement) -> Self {
        self.push(action, element_type, element);
        self
    }

    /// In-place form of [`RawChangeBatch::with`].
    pub fn push(&mut self, action: &str, element_type: &str, element: RawElement) {
        if self.blocks.last().is_none_or(|block| block.action != action) {
            self.blocks.push(RawActionBlock {
                action: action.to_owned(),
                groups: Vec::new(),
            });
        }
        let Some(block) = self.blocks.last_mut() else {
            return;
        };
        match block.groups.last_mut() {
            Some(group) if group.element_type == element_type => group.elements.push(element),
            _ => block.groups.push(RawTypeGroup {
                element_type: element_type.to_owned(),
                elements: vec![element],
            }),
        }
    }

    /// Total number of raw elements across all blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks
            .iter()
            .flat_map(|block| &block.groups)
            .map(|group| group.elements.len())
            .sum()
    }

    /// Whether the batch holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Elements sharing one action.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawActionBlock {
    /// `create`, `modify` or `delete`.
    pub action: String,
    /// Element groups in document order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub groups: Vec<RawTypeGroup>,
}

/// Elements sharing one action and one type.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawTypeGroup {
    /// `node`, `way` or `relation`; anything else is dropped.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub element_type: String,
    /// Elements in document order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub elements: Vec<RawElement>,
}

/// One element with every attribute optional.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RawElement {
    /// Client id; negative for creates.
    pub id: i64,
    /// Version being edited.
    pub version: Option<i64>,
    /// Node latitude in degrees.
    pub lat: Option<f64>,
    /// Node longitude in degrees.
    pub lon: Option<f64>,
    /// Tags as key/value pairs.
    pub tags: Vec<RawTag>,
    /// Way node references.
    pub nodes: Vec<i64>,
    /// Relation members.
    pub members: Vec<RawMember>,
}

impl RawElement {
    /// A node at the given position.
    #[must_use]
    pub fn node(id: i64, lat: f64, lon: f64) -> Self {
        Self {
            id,
            lat: Some(lat),
            lon: Some(lon),
            ..Self::default()
        }
    }

    /// A way over the given node references.
    #[must_use]
    pub fn way(id: i64, nodes: Vec<i64>) -> Self {
        Self {
            id,
            nodes,
            ..Self::default()
        }
    }

    /// A relation with the given members.
    #[must_use]
    pub fn relation(id: i64, members: Vec<RawMember>) -> Self {
        Self {
            id,
            members,
            ..Self::default()
        }
    }

    /// A bare reference, as used by deletes.
    #[must_use]
    pub fn reference(id: i64, version: i64) -> Self {
        Self {
            id,
            version: Some(version),
            ..Self::default()
        }
    }

    /// Set the version being edited.
    #[must_use]
    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    /// Append a tag.
    #[must_use]
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push(RawTag {
            k: key.to_owned(),
            v: value.to_owned(),
        });
        self
    }
}

/// A tag pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawTag {
    /// Key.
    pub k: String,
    /// Value.
    pub v: String,
}

/// A relation member reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawMember {
    /// Member element type.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub member_type: String,
    /// Member id; may be a placeholder.
    #[cfg_attr(feature = "serde", serde(rename = "ref"))]
    pub reference: i64,
    /// Member role.
    #[cfg_attr(feature = "serde", serde(default))]
    pub role: String,
}

impl RawMember {
    /// Construct a member reference.
    #[must_use]
    pub fn new(member_type: &str, reference: i64, role: &str) -> Self {
        Self {
            member_type: member_type.to_owned(),
            reference,
            role: role.to_owned(),
        }
    }
}
