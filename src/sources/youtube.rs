use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{is_url, LookupService, ResolvedTrack};

/// Cantidad de resultados que se revisan en una búsqueda
const SEARCH_CANDIDATES: usize = 5;

/// Cliente de lookup basado en yt-dlp
pub struct YtDlpLookup {
    binary: String,
    // Limitar procesos concurrentes para evitar rate limiting
    rate_limiter: Semaphore,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    #[serde(default)]
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    url: Option<String>,
    formats: Option<Vec<Format>>,
}

#[derive(Debug, Deserialize)]
struct Format {
    #[serde(default)]
    format_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    acodec: Option<String>,
    abr: Option<f64>,
    tbr: Option<f64>,
    #[serde(default)]
    protocol: Option<String>,
}

impl Format {
    fn is_hls(&self) -> bool {
        let url_is_hls = self.url.as_deref().is_some_and(|u| u.contains(".m3u8"));
        let protocol_is_hls = self.protocol.as_deref().is_some_and(|p| p.contains("hls"));
        url_is_hls || protocol_is_hls
    }

    fn bitrate(&self) -> f64 {
        self.abr.filter(|abr| *abr > 0.0).or(self.tbr).unwrap_or(0.0)
    }
}

impl YtDlpLookup {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            rate_limiter: Semaphore::new(3),
        }
    }

    /// Ejecuta yt-dlp y parsea una entrada JSON por línea
    async fn extract(&self, target: &str) -> Result<Vec<YtDlpInfo>> {
        let _permit = self.rate_limiter.acquire().await?;

        debug!("📊 Obteniendo info de: {}", target);

        let output = Command::new(&self.binary)
            .args(["--no-playlist", "--dump-json", "--no-warnings", target])
            .kill_on_drop(true)
            .output()
            .await
            .context("Error al ejecutar yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_entries(&stdout))
    }

    /// Verifica que yt-dlp esté disponible
    pub async fn verify(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .context("yt-dlp no está disponible")?;

        if !output.status.success() {
            anyhow::bail!("yt-dlp no puede ejecutarse correctamente");
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl LookupService for YtDlpLookup {
    async fn resolve(&self, query: &str) -> Result<Option<ResolvedTrack>> {
        let target = if is_url(query) {
            query.to_string()
        } else {
            info!("🔍 Buscando en YouTube: {}", query);
            format!("ytsearch{}:{}", SEARCH_CANDIDATES, query)
        };

        let entries = self.extract(&target).await?;
        let Some(info) = pick_preferred_entry(entries) else {
            return Ok(None);
        };

        let Some(stream_url) = select_stream_url(&info) else {
            warn!("⚠️ Sin URL de stream válida para: {}", query);
            return Ok(None);
        };

        Ok(Some(ResolvedTrack {
            stream_url,
            page_url: info.webpage_url.clone().unwrap_or_else(|| target.clone()),
            title: info.title.clone().unwrap_or_else(|| "Desconocido".to_string()),
            duration: info.duration.filter(|d| *d > 0.0).map(Duration::from_secs_f64),
            thumbnail: info.thumbnail.clone(),
        }))
    }

    async fn refresh(&self, page_url: &str) -> Result<Option<String>> {
        info!("🔄 Refrescando stream para: {}", page_url);
        let entries = self.extract(page_url).await?;
        Ok(entries.first().and_then(select_stream_url))
    }
}

fn parse_entries(stdout: &str) -> Vec<YtDlpInfo> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<YtDlpInfo>(line) {
            Ok(info) => Some(info),
            Err(e) => {
                debug!("Línea de yt-dlp ignorada: {}", e);
                None
            }
        })
        .collect()
}

/// Entre los primeros resultados prefiere versiones de audio oficiales
fn pick_preferred_entry(entries: Vec<YtDlpInfo>) -> Option<YtDlpInfo> {
    let preferred = entries.iter().take(SEARCH_CANDIDATES).position(|entry| {
        let title = entry.title.as_deref().unwrap_or_default().to_lowercase();
        let channel = entry.channel.as_deref().unwrap_or_default().to_lowercase();

        ["official audio", "audio", "lyric"]
            .iter()
            .any(|keyword| title.contains(keyword))
            || channel.contains("topic")
            || channel.contains("vevo")
    });

    let index = preferred.unwrap_or(0);
    entries.into_iter().nth(index)
}

/// Mejor URL de audio: formatos directos antes que HLS, mayor bitrate primero
fn select_stream_url(info: &YtDlpInfo) -> Option<String> {
    let audio_formats = info
        .formats
        .iter()
        .flatten()
        .filter(|f| f.acodec.as_deref() != Some("none"))
        .filter(|f| f.url.as_deref().is_some_and(|u| !u.is_empty()));

    let (hls, direct): (Vec<&Format>, Vec<&Format>) = audio_formats.partition(|f| f.is_hls());

    fn best<'a>(formats: Vec<&'a Format>) -> Option<&'a Format> {
        formats
            .into_iter()
            .max_by(|a, b| a.bitrate().total_cmp(&b.bitrate()))
    }

    if let Some(format) = best(direct) {
        debug!(
            "Formato directo seleccionado: {:?} ({}kbps)",
            format.format_id,
            format.bitrate()
        );
        return format.url.clone();
    }

    if let Some(format) = best(hls) {
        warn!("⚠️ Usando formato HLS: {:?}", format.format_id);
        return format.url.clone();
    }

    info.url.clone().filter(|u| !u.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn info(json: serde_json::Value) -> YtDlpInfo {
        serde_json::from_value(json).expect("fixture válido")
    }

    #[test]
    fn prefers_direct_format_with_highest_bitrate() {
        let info = info(serde_json::json!({
            "title": "Song",
            "formats": [
                { "format_id": "video", "url": "https://v/1", "acodec": "none", "abr": 0.0 },
                { "format_id": "hls", "url": "https://h/x.m3u8", "acodec": "opus", "abr": 320.0 },
                { "format_id": "low", "url": "https://d/low", "acodec": "opus", "abr": 64.0 },
                { "format_id": "high", "url": "https://d/high", "acodec": "opus", "abr": 160.0 }
            ]
        }));

        assert_eq!(select_stream_url(&info), Some("https://d/high".to_string()));
    }

    #[test]
    fn falls_back_to_hls_then_info_url() {
        let hls_only = info(serde_json::json!({
            "formats": [
                { "url": "https://h/a", "acodec": "mp4a", "protocol": "m3u8_native", "tbr": 128.0 }
            ]
        }));
        assert_eq!(select_stream_url(&hls_only), Some("https://h/a".to_string()));

        let bare = info(serde_json::json!({ "url": "https://plain/stream" }));
        assert_eq!(select_stream_url(&bare), Some("https://plain/stream".to_string()));

        let nothing = info(serde_json::json!({ "title": "x" }));
        assert_eq!(select_stream_url(&nothing), None);
    }

    #[test]
    fn picks_official_audio_among_search_results() {
        let stdout = [
            r#"{"title":"Song (Live at Somewhere)","channel":"Fan"}"#,
            r#"{"title":"Song","channel":"Artist - Topic"}"#,
            r#"not json"#,
        ]
        .join("\n");

        let entries = parse_entries(&stdout);
        assert_eq!(entries.len(), 2);

        let picked = pick_preferred_entry(entries).and_then(|e| e.channel);
        assert_eq!(picked.as_deref(), Some("Artist - Topic"));
    }

    #[test]
    fn defaults_to_first_entry() {
        let entries = parse_entries(r#"{"title":"First"}
{"title":"Second"}"#);
        let picked = pick_preferred_entry(entries).and_then(|e| e.title);
        assert_eq!(picked.as_deref(), Some("First"));
    }

    /// Estado del proceso en `/proc`; `None` si ya no existe
    #[cfg(target_os = "linux")]
    fn process_state(pid: &str) -> Option<char> {
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        let after_name = stat.rsplit_once(')')?.1;
        after_name.trim_start().chars().next()
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn abandoned_lookup_kills_yt_dlp() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("pid");
        let script = dir.path().join("yt-dlp");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho $$ > {}\nexec sleep 30\n", pid_file.display()),
        )
        .expect("script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("permisos");

        let lookup = YtDlpLookup::new(script.display().to_string());
        let result = tokio::time::timeout(Duration::from_secs(1), lookup.extract("ytsearch5:lento")).await;
        assert!(result.is_err());

        let pid = std::fs::read_to_string(&pid_file).expect("pid escrito");
        let pid = pid.trim();

        let mut gone = false;
        for _ in 0..100 {
            if matches!(process_state(pid), None | Some('Z') | Some('X')) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone, "yt-dlp {pid} sigue vivo");
    }
}
