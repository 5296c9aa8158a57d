use std::collections::BTreeMap;

/// Keys that carry no semantic weight. They are ignored when comparing or
/// merging tag lists and are never uploaded.
pub const DISCARDABLE_KEYS: &[&str] = &[
    "created_by",
    "converted_by",
    "odbl",
    "odbl:note",
    "tiger:upload_uuid",
    "tiger:tlid",
    "tiger:source",
    "tiger:separated",
    "geobase:datasetName",
    "geobase:uuid",
    "sub_sea:type",
    "KSJ2:curve_id",
    "KSJ2:lat",
    "KSJ2:long",
    "yh:LINE_NAME",
    "yh:LINE_NUM",
    "yh:STRUCTURE",
    "yh:TOTYUMONO",
    "yh:TYPE",
    "yh:WIDTH_RANK",
    "SK53_bulk:load",
];

pub fn is_discardable(key: &str) -> bool {
    DISCARDABLE_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Tag {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn is_discardable(&self) -> bool {
        is_discardable(&self.key)
    }
}

/// Key/value collection as handed over by editing dialogs. A key may map to
/// several values.
pub type TagMap = BTreeMap<String, Vec<String>>;

/// Ordered tag sequence owned by exactly one object.
#[derive(Debug, Clone, Default)]
pub struct TagList {
    tags: Vec<Tag>,
}

impl TagList {
    pub fn new() -> Self {
        TagList { tags: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.tags.iter()
    }

    /// All tags that are not discardable.
    pub fn real_tags(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter().filter(|t| !t.is_discardable())
    }

    pub fn has_real_tags(&self) -> bool {
        self.real_tags().next().is_some()
    }

    pub fn get_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    pub fn contains<F: FnMut(&Tag) -> bool>(&self, pred: F) -> bool {
        self.tags.iter().any(pred)
    }

    /// Whether two real tags share a key, ignoring case.
    pub fn has_tag_collisions(&self) -> bool {
        let real: Vec<&Tag> = self.real_tags().collect();
        real.iter().enumerate().any(|(idx, tag)| {
            real[idx + 1..]
                .iter()
                .any(|other| other.key.eq_ignore_ascii_case(&tag.key))
        })
    }

    pub fn push(&mut self, tag: Tag) {
        self.tags.push(tag);
    }

    /// Set the value of `key`, appending the tag if it does not exist yet.
    /// Returns whether anything changed.
    pub fn update(&mut self, key: &str, value: &str) -> bool {
        match self.tags.iter_mut().find(|t| t.key == key) {
            Some(tag) if tag.value == value => false,
            Some(tag) => {
                tag.value = value.to_string();
                true
            }
            None => {
                self.tags.push(Tag::new(key, value));
                true
            }
        }
    }

    /// Remove every tag with the given key. Returns whether one was found.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t.key != key);
        before != self.tags.len()
    }

    pub fn clear(&mut self) {
        self.tags.clear();
    }

    pub fn replace(&mut self, tags: Vec<Tag>) {
        self.tags = tags;
    }

    pub fn replace_map(&mut self, map: &TagMap) {
        self.tags = map
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| Tag::new(k.as_str(), v.as_str())))
            .collect();
    }

    pub(crate) fn tags_mut(&mut self) -> &mut Vec<Tag> {
        &mut self.tags
    }

    /// Absorb the real tags of `other` that are not already present with the
    /// same value. Returns whether a key was present with a different value.
    /// `other` is empty afterwards.
    pub fn merge(&mut self, other: &mut TagList) -> bool {
        let incoming = std::mem::take(&mut other.tags);

        if !self.has_real_tags() {
            self.tags.extend(incoming.into_iter().filter(|t| !t.is_discardable()));
            return false;
        }

        let mut conflict = false;
        for tag in incoming {
            if tag.is_discardable() {
                continue;
            }
            if self.tags.iter().any(|t| t.key == tag.key && t.value == tag.value) {
                continue;
            }
            if self.tags.iter().any(|t| t.key == tag.key) {
                conflict = true;
            }
            self.tags.push(tag);
        }
        conflict
    }

    /// Real tags as a sorted multiset, the order of the list does not matter.
    fn sorted_pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self
            .real_tags()
            .map(|tag| (tag.key.as_str(), tag.value.as_str()))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    /// Deep copy of all real tags.
    pub fn real_copy(&self) -> TagList {
        self.real_tags().cloned().collect()
    }

    pub fn as_map(&self) -> TagMap {
        let mut map = TagMap::new();
        for tag in self.real_tags() {
            map.entry(tag.key.clone()).or_default().push(tag.value.clone());
        }
        map
    }
}

impl PartialEq for TagList {
    fn eq(&self, other: &TagList) -> bool {
        self.sorted_pairs() == other.sorted_pairs()
    }
}

impl PartialEq<TagMap> for TagList {
    fn eq(&self, other: &TagMap) -> bool {
        let mut pairs: Vec<(&str, &str)> = other
            .iter()
            .filter(|(k, _)| !is_discardable(k))
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
            .collect();
        pairs.sort_unstable();
        self.sorted_pairs() == pairs
    }
}

impl FromIterator<Tag> for TagList {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        TagList {
            tags: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a TagList {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.iter()
    }
}
