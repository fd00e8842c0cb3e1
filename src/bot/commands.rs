use std::time::Duration;

use crate::sources::Song;

/// Comandos de texto que entiende el bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Referencias separadas por espacios, o un título
    Play(String),
    Skip,
    Stop,
    /// Alterna pausa
    Pause,
    /// Mueve la sesión al canal de voz de quien lo pide
    Summon,
    Now,
    Queue,
    Cache(bool),
    Help,
}

/// Interpreta un mensaje. `None` si no lleva el prefijo o no es un comando.
pub fn parse(content: &str, prefix: &str) -> Option<Command> {
    let body = content.trim().strip_prefix(prefix)?;
    let (name, args) = match body.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (body, ""),
    };

    let command = match name.to_lowercase().as_str() {
        "play" | "p" if !args.is_empty() => Command::Play(args.to_string()),
        "skip" | "s" => Command::Skip,
        "stop" => Command::Stop,
        "pause" | "resume" => Command::Pause,
        "summon" | "join" => Command::Summon,
        "now" | "np" => Command::Now,
        "queue" | "q" => Command::Queue,
        "cache" => match args.to_lowercase().as_str() {
            "on" => Command::Cache(true),
            "off" => Command::Cache(false),
            _ => return None,
        },
        "help" => Command::Help,
        _ => return None,
    };

    Some(command)
}

pub fn help_text(prefix: &str) -> String {
    format!(
        "**Comandos**\n\
        `{p}play <url|título>` agrega canciones a la cola\n\
        `{p}skip` salta la canción actual\n\
        `{p}stop` detiene y limpia la cola\n\
        `{p}pause` pausa o reanuda\n\
        `{p}summon` mueve el bot a tu canal de voz\n\
        `{p}now` canción actual\n\
        `{p}queue` cola de reproducción\n\
        `{p}cache on|off` descarga local de canciones",
        p = prefix
    )
}

/// `3:05`, `1:02:03`; `en vivo` sin duración
pub fn format_duration(duration: Option<Duration>) -> String {
    let Some(duration) = duration else {
        return "en vivo".to_string();
    };

    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

pub fn song_line(song: &Song) -> String {
    format!("**{}** `[{}]`", song.title(), format_duration(song.duration()))
}

/// Canción actual con su origen: backend de extracción, copia local y miniatura
pub fn now_text(song: &Song) -> String {
    let mut lines = vec![
        format!("🎵 Sonando: {}", song_line(song)),
        format!("<{}>", song.public_link()),
    ];

    let mut details = Vec::new();
    if let Some(extractor) = song.extractor() {
        details.push(format!("🔧 vía {}", extractor));
    }
    if song.is_cached() {
        details.push("💾 desde caché".to_string());
    }
    if !details.is_empty() {
        lines.push(details.join(" · "));
    }

    if let Some(thumbnail) = song.thumbnail() {
        lines.push(thumbnail.url.clone());
    }

    lines.join("\n")
}

/// Lista de la cola, limitada a `limit` entradas
pub fn queue_text(songs: &[Song], limit: usize) -> String {
    if songs.is_empty() {
        return "📭 La cola está vacía".to_string();
    }

    let mut lines: Vec<String> = songs
        .iter()
        .take(limit)
        .enumerate()
        .map(|(index, song)| format!("`{}.` {}", index + 1, song_line(song)))
        .collect();

    if songs.len() > limit {
        lines.push(format!("... y {} más", songs.len() - limit));
    }

    let total: Duration = songs.iter().filter_map(Song::duration).sum();
    lines.push(format!(
        "⏱️ {} canciones, {}",
        songs.len(),
        humantime::format_duration(total)
    ));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{ExtractorKind, SourceKind, Thumbnail};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse("!play https://youtu.be/a https://youtu.be/b", "!"),
            Some(Command::Play("https://youtu.be/a https://youtu.be/b".to_string()))
        );
        assert_eq!(parse("!p  never gonna give you up ", "!"), Some(Command::Play("never gonna give you up".to_string())));
        assert_eq!(parse("!SKIP", "!"), Some(Command::Skip));
        assert_eq!(parse("!cache on", "!"), Some(Command::Cache(true)));
        assert_eq!(parse("!cache OFF", "!"), Some(Command::Cache(false)));
        assert_eq!(parse("!summon", "!"), Some(Command::Summon));
    }

    #[test]
    fn test_parse_rejects_noise() {
        assert_eq!(parse("play something", "!"), None);
        assert_eq!(parse("!play", "!"), None);
        assert_eq!(parse("!cache maybe", "!"), None);
        assert_eq!(parse("!dance", "!"), None);
        assert_eq!(parse("?skip", "!"), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Some(Duration::from_secs(185))), "3:05");
        assert_eq!(format_duration(Some(Duration::from_secs(3723))), "1:02:03");
        assert_eq!(format_duration(None), "en vivo");
    }

    #[test]
    fn test_now_text_shows_origin() {
        let mut song = Song::new("Song a", "https://youtu.be/a", "https://cdn/a", "a", SourceKind::Platform)
            .with_duration(Duration::from_secs(65))
            .with_extractor(ExtractorKind::General)
            .with_thumbnail(Thumbnail {
                url: "https://i.ytimg.com/vi/a/hq.jpg".to_string(),
                width: 480,
                height: 360,
            });

        assert_eq!(
            now_text(&song),
            "🎵 Sonando: **Song a** `[1:05]`\n<https://youtu.be/a>\n🔧 vía yt-dlp\nhttps://i.ytimg.com/vi/a/hq.jpg"
        );

        song.switch_to_cached(PathBuf::from("/cache/a.webm"));
        assert!(now_text(&song).contains("🔧 vía yt-dlp · 💾 desde caché"));

        let radio = Song::new("radio", "http://radio/live", "http://radio/live", "stream:radio", SourceKind::InternetStream);
        assert_eq!(now_text(&radio), "🎵 Sonando: **radio** `[en vivo]`\n<http://radio/live>");
    }

    #[test]
    fn test_queue_text_truncates() {
        let songs: Vec<Song> = (0..3)
            .map(|i| {
                Song::new(format!("Song {i}"), "l", "l", i.to_string(), SourceKind::Platform)
                    .with_duration(Duration::from_secs(60))
            })
            .collect();

        let text = queue_text(&songs, 2);
        assert!(text.contains("`1.` **Song 0** `[1:00]`"));
        assert!(!text.contains("Song 2"));
        assert!(text.contains("... y 1 más"));
        assert!(text.contains("3 canciones, 3m"));
        assert_eq!(queue_text(&[], 10), "📭 La cola está vacía");
    }
}
