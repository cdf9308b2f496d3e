//! Identifiants d'adresse stables et utilisables dans une URL

use unicode_normalization::UnicodeNormalization;

/// Slug d'une adresse.
///
/// Un UPRN non vide est repris tel quel. Sinon le slug est dérivé de la
/// juridiction, du bureau référencé, du texte de l'adresse et du code postal.
/// Les séparateurs sont conservés sous forme de tirets, ce qui distingue
/// `1/2 Foo Street` (`1-2-foo-street`) de `12 Foo Street`.
pub fn slug_for(
    jurisdiction_id: &str,
    station_ref: &str,
    address: &str,
    postcode: &str,
    uprn: Option<&str>,
) -> String {
    if let Some(uprn) = uprn.map(str::trim).filter(|u| !u.is_empty()) {
        return uprn.to_string();
    }

    slugify(&format!("{jurisdiction_id}-{station_ref}-{address}-{postcode}"))
}

/// Décomposition NFKD, suppression du non-ASCII, minuscules, toute suite de
/// caractères hors `[a-z0-9_-]` remplacée par un tiret, tirets de bord retirés.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_hyphen = false;

    for c in text.nfkd().filter(char::is_ascii) {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            // '-' et ponctuation se fondent en un seul tiret
            pending_hyphen = true;
        }
    }

    out
}
