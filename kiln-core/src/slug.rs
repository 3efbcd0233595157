//! URL slug derivation.

use deunicode::deunicode;

/// Convert arbitrary text into a URL-safe slug.
///
/// Unicode is transliterated to ASCII, letters are lowercased and every run of
/// other characters collapses into a single `-`. The result never starts or
/// ends with `-`, so `slugify(slugify(x)) == slugify(x)`.
pub fn slugify(text: &str) -> String {
    let ascii = deunicode(text);
    let mut slug = String::with_capacity(ascii.len());
    let mut pending_dash = false;

    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}
