use std::fmt::{Debug, Formatter};

/// Maps a member name onto its wire name when no explicit name is declared.
#[derive(Clone, Default)]
pub enum NamingPolicy {
    /// The member name is used verbatim.
    Identity,
    /// `first_name` becomes `firstName`.
    #[default]
    CamelCase,
    /// `first_name` becomes `FirstName`.
    PascalCase,
    /// `firstName` becomes `first_name`.
    SnakeCase,
    /// Caller supplied mapping. `key` identifies it in the schema cache and must be unique per
    /// distinct function.
    Custom {
        key: &'static str,
        rename: fn(&str) -> String,
    },
}

impl NamingPolicy {
    pub fn apply(&self, member: &str) -> String {
        match self {
            NamingPolicy::Identity => member.to_string(),
            NamingPolicy::CamelCase => {
                let mut output = String::with_capacity(member.len());
                for (index, word) in split_words(member).iter().enumerate() {
                    if index == 0 {
                        output.push_str(word);
                    } else {
                        output.push_str(&capitalize(word));
                    }
                }
                output
            }
            NamingPolicy::PascalCase => split_words(member)
                .iter()
                .map(|word| capitalize(word))
                .collect(),
            NamingPolicy::SnakeCase => split_words(member).join("_"),
            NamingPolicy::Custom { rename, .. } => rename(member),
        }
    }

    pub(crate) fn cache_key(&self) -> &'static str {
        match self {
            NamingPolicy::Identity => "identity",
            NamingPolicy::CamelCase => "camel",
            NamingPolicy::PascalCase => "pascal",
            NamingPolicy::SnakeCase => "snake",
            NamingPolicy::Custom { key, .. } => *key,
        }
    }
}

impl Debug for NamingPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NamingPolicy::Custom { key, .. } => write!(f, "Custom({key})"),
            other => f.write_str(other.cache_key()),
        }
    }
}

/// Lowercase words of an identifier, split on separators and case boundaries.
fn split_words(name: &str) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (index, &ch) in chars.iter().enumerate() {
        if ch == '_' || ch == '-' || ch.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if ch.is_uppercase() && !current.is_empty() {
            let previous = chars[index - 1];
            let next_is_lower = chars
                .get(index + 1)
                .map(|next| next.is_lowercase())
                .unwrap_or(false);
            // "userID" splits before "I"; "HTTPServer" splits before "S".
            if previous.is_lowercase()
                || previous.is_ascii_digit()
                || (previous.is_uppercase() && next_is_lower)
            {
                words.push(std::mem::take(&mut current));
            }
        }

        current.extend(ch.to_lowercase());
    }

    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
