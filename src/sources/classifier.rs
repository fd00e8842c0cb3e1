use std::path::Path;
use url::Url;

/// What a user reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    /// Página de una plataforma conocida, con su nombre
    Platform(&'static str),
    /// Cualquier otra URL HTTP(S); la validez se decide al sondear el content-type
    InternetStream,
    /// `file://` o ruta absoluta
    LocalFile,
    /// Texto libre que hay que buscar
    Title,
}

/// Dominios de plataformas soportadas por los extractores.
/// Se compara el host exacto o cualquier subdominio.
const PLATFORM_DOMAINS: &[(&str, &str)] = &[
    ("youtube.com", "YouTube"),
    ("youtu.be", "YouTube"),
    ("youtube-nocookie.com", "YouTube"),
    ("soundcloud.com", "SoundCloud"),
    ("bandcamp.com", "Bandcamp"),
    ("mixcloud.com", "Mixcloud"),
    ("audiomack.com", "Audiomack"),
    ("audius.co", "Audius"),
    ("hearthis.at", "hearthis.at"),
    ("vimeo.com", "Vimeo"),
    ("dailymotion.com", "Dailymotion"),
    ("twitch.tv", "Twitch"),
    ("bilibili.com", "Bilibili"),
    ("nicovideo.jp", "Niconico"),
    ("archive.org", "Internet Archive"),
    ("freesound.org", "Freesound"),
    ("deezer.com", "Deezer"),
    ("bbc.co.uk", "BBC"),
    ("facebook.com", "Facebook"),
    ("tiktok.com", "TikTok"),
    ("rumble.com", "Rumble"),
    ("odysee.com", "Odysee"),
    ("bitchute.com", "BitChute"),
    ("podcasts.apple.com", "Apple Podcasts"),
    ("anchor.fm", "Anchor"),
];

/// Clasifica una referencia. Nunca falla: los dominios desconocidos se tratan
/// como stream de internet y el resolver valida su content-type.
pub fn classify(reference: &str) -> Reference {
    let reference = reference.trim();

    if reference.starts_with("file://") || Path::new(reference).is_absolute() {
        return Reference::LocalFile;
    }

    let Ok(url) = Url::parse(reference) else {
        return Reference::Title;
    };

    if !matches!(url.scheme(), "http" | "https") {
        return Reference::Title;
    }

    match url.host_str() {
        Some(host) => platform_for_host(host)
            .map(Reference::Platform)
            .unwrap_or(Reference::InternetStream),
        None => Reference::Title,
    }
}

/// Busca el nombre de la plataforma para un host
pub fn platform_for_host(host: &str) -> Option<&'static str> {
    let host = host.trim_start_matches("www.").to_ascii_lowercase();

    PLATFORM_DOMAINS.iter().find_map(|(domain, name)| {
        let is_match = host == *domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'));
        is_match.then_some(*name)
    })
}
