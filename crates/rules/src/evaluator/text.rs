//! Haystack construction and accent folding.

/// Lowercase and strip Spanish diacritics so `Fundación` matches `fundaciones`.
pub fn fold(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Searchable text of one record, prepared once and shared by every rule.
#[derive(Debug, Clone)]
pub struct Haystack {
    /// Lowercased, for regex rules.
    pub lowered: String,
    /// Lowercased and folded, for keyword rules.
    pub folded: String,
    /// Folded department only.
    pub department: String,
}

impl Haystack {
    pub fn new<'a>(parts: impl IntoIterator<Item = &'a str>, department: &str) -> Self {
        let joined = parts
            .into_iter()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            lowered: joined.to_lowercase(),
            folded: fold(&joined),
            department: fold(department),
        }
    }

    /// Keywords (as given) found in the folded haystack.
    pub fn keyword_hits<'k>(&self, keywords: &'k [String]) -> Vec<&'k str> {
        keywords
            .iter()
            .filter(|k| {
                let needle = fold(k.trim());
                !needle.is_empty() && self.folded.contains(&needle)
            })
            .map(String::as_str)
            .collect()
    }
}
