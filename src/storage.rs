use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::model::id::{GuildId, UserId};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::{debug, info, warn};

/// Tipo de evento registrado en el play log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Play,
    Skip,
    Previous,
    Stop,
    Seek,
}

/// Sink de historial de reproducción.
///
/// Fire-and-forget: las implementaciones no bloquean al llamador y un fallo
/// de escritura nunca afecta a la reproducción.
pub trait PlayLog: Send + Sync {
    fn record_play(&self, guild_id: GuildId, user_id: UserId, title: &str, locator: &str);
    fn record_event(&self, guild_id: GuildId, user_id: UserId, kind: EventKind, title: &str);
}

/// Una línea del archivo de historial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayEntry {
    pub kind: EventKind,
    pub user_id: u64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub at: DateTime<Utc>,
}

/// Play log en archivos JSONL, uno por guild: `<data_dir>/history/guild_<id>.jsonl`
#[derive(Clone)]
pub struct JsonPlayLog {
    inner: Arc<PlayLogInner>,
}

struct PlayLogInner {
    history_dir: PathBuf,
    // serializa los appends para no intercalar líneas
    write_lock: Mutex<()>,
}

impl JsonPlayLog {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        let history_dir = data_dir.join("history");
        fs::create_dir_all(&history_dir)
            .await
            .with_context(|| format!("No se pudo crear {}", history_dir.display()))?;

        info!("📁 Play log inicializado en: {}", history_dir.display());

        Ok(Self {
            inner: Arc::new(PlayLogInner {
                history_dir,
                write_lock: Mutex::new(()),
            }),
        })
    }

    fn guild_file(&self, guild_id: GuildId) -> PathBuf {
        self.inner
            .history_dir
            .join(format!("guild_{}.jsonl", guild_id.get()))
    }

    /// Agrega una entrada al archivo de la guild
    pub async fn append(&self, guild_id: GuildId, entry: &PlayEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.inner.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.guild_file(guild_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!("💾 {:?} registrado para guild {}: {}", entry.kind, guild_id, entry.title);
        Ok(())
    }

    fn spawn_append(&self, guild_id: GuildId, entry: PlayEntry) {
        let log = self.clone();
        tokio::spawn(async move {
            if let Err(e) = log.append(guild_id, &entry).await {
                warn!("⚠️ No se pudo registrar en el historial de guild {}: {:?}", guild_id, e);
            }
        });
    }

    /// Últimas reproducciones, la más reciente primero
    pub async fn recent(&self, guild_id: GuildId, limit: usize) -> Result<Vec<PlayEntry>> {
        let mut plays: Vec<PlayEntry> = self
            .read_entries(guild_id)
            .await?
            .into_iter()
            .filter(|entry| entry.kind == EventKind::Play)
            .collect();

        plays.sort_by(|a, b| b.at.cmp(&a.at));
        plays.truncate(limit);
        Ok(plays)
    }

    /// Títulos más reproducidos con su cantidad de reproducciones
    pub async fn top_tracks(&self, guild_id: GuildId, limit: usize) -> Result<Vec<(String, usize)>> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for entry in self.read_entries(guild_id).await? {
            if entry.kind == EventKind::Play {
                *counts.entry(entry.title).or_default() += 1;
            }
        }

        let mut top: Vec<(String, usize)> = counts.into_iter().collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(limit);
        Ok(top)
    }

    async fn read_entries(&self, guild_id: GuildId) -> Result<Vec<PlayEntry>> {
        let path = self.guild_file(guild_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Línea inválida en {}: {}", path.display(), e);
                    None
                }
            })
            .collect())
    }
}

impl PlayLog for JsonPlayLog {
    fn record_play(&self, guild_id: GuildId, user_id: UserId, title: &str, locator: &str) {
        self.spawn_append(
            guild_id,
            PlayEntry {
                kind: EventKind::Play,
                user_id: user_id.get(),
                title: title.to_string(),
                url: Some(locator.to_string()),
                at: Utc::now(),
            },
        );
    }

    fn record_event(&self, guild_id: GuildId, user_id: UserId, kind: EventKind, title: &str) {
        self.spawn_append(
            guild_id,
            PlayEntry {
                kind,
                user_id: user_id.get(),
                title: title.to_string(),
                url: None,
                at: Utc::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn entry(kind: EventKind, title: &str, minutes_ago: i64) -> PlayEntry {
        PlayEntry {
            kind,
            user_id: 42,
            title: title.to_string(),
            url: None,
            at: Utc::now() - ChronoDuration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn recent_returns_latest_plays_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = JsonPlayLog::new(dir.path().to_path_buf()).await.expect("log");
        let guild = GuildId::new(1);

        log.append(guild, &entry(EventKind::Play, "old", 30)).await.expect("append");
        log.append(guild, &entry(EventKind::Skip, "old", 29)).await.expect("append");
        log.append(guild, &entry(EventKind::Play, "new", 1)).await.expect("append");

        let recent = log.recent(guild, 10).await.expect("recent");
        let titles: Vec<&str> = recent.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "old"]);

        assert!(log.recent(GuildId::new(2), 10).await.expect("vacío").is_empty());
    }

    #[tokio::test]
    async fn top_tracks_counts_plays_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = JsonPlayLog::new(dir.path().to_path_buf()).await.expect("log");
        let guild = GuildId::new(1);

        for title in ["a", "b", "a", "c", "a", "b"] {
            log.append(guild, &entry(EventKind::Play, title, 5)).await.expect("append");
        }
        log.append(guild, &entry(EventKind::Skip, "c", 1)).await.expect("append");

        let top = log.top_tracks(guild, 2).await.expect("top");
        assert_eq!(top, vec![("a".to_string(), 3), ("b".to_string(), 2)]);
    }

    #[tokio::test]
    async fn record_play_writes_in_background() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = JsonPlayLog::new(dir.path().to_path_buf()).await.expect("log");
        let guild = GuildId::new(9);

        log.record_play(guild, UserId::new(3), "Song", "https://www.youtube.com/watch?v=x");

        let mut recent = Vec::new();
        for _ in 0..100 {
            recent = log.recent(guild, 5).await.expect("recent");
            if !recent.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].user_id, 3);
        assert_eq!(recent[0].url.as_deref(), Some("https://www.youtube.com/watch?v=x"));
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = JsonPlayLog::new(dir.path().to_path_buf()).await.expect("log");
        let guild = GuildId::new(1);

        log.append(guild, &entry(EventKind::Play, "ok", 1)).await.expect("append");
        let path = log.guild_file(guild);
        let mut content = fs::read_to_string(&path).await.expect("leer");
        content.push_str("{not json\n");
        fs::write(&path, content).await.expect("escribir");

        assert_eq!(log.recent(guild, 5).await.expect("recent").len(), 1);
    }
}
