use std::fmt::Write;

use anyhow::{bail, Context};
use async_trait::async_trait;
use camino::Utf8PathBuf as PathBuf;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::JobHandler;
use crate::{
    storage::local_fs,
    types::{Job, Record},
};

const TITLE: &str = "Sunspots recorded per year";
const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 480.0;
const MARGIN: f64 = 60.0;
const MAX_TICKS: usize = 10;

/// Image host that accepts the raw chart as the request body and answers
/// with `{"data": {"link": ...}}`.
#[derive(Debug, Clone)]
pub struct ChartUpload {
    pub url: String,
    /// Sent as the `Authorization` header, e.g. `Client-ID <id>`.
    pub authorization: Option<String>,
}

/// Renders a bar chart of the selection and publishes it.
pub struct GraphHandler {
    chart_dir: PathBuf,
    upload: Option<ChartUpload>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct UploadResponse {
    data: UploadedImage,
}

#[derive(Deserialize)]
struct UploadedImage {
    link: String,
}

impl GraphHandler {
    pub fn new(chart_dir: PathBuf, upload: Option<ChartUpload>) -> Self {
        Self {
            chart_dir,
            upload,
            client: reqwest::Client::new(),
        }
    }

    async fn upload(&self, target: &ChartUpload, image: Vec<u8>) -> anyhow::Result<String> {
        let mut request = self
            .client
            .post(&target.url)
            .header(reqwest::header::CONTENT_TYPE, "image/svg+xml")
            .body(image);
        if let Some(auth) = &target.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }
        let response: UploadResponse = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Unexpected upload response")?;
        Ok(response.data.link)
    }
}

#[async_trait]
impl JobHandler for GraphHandler {
    async fn handle(&self, job: &Job, selection: &[Record]) -> anyhow::Result<Value> {
        if selection.is_empty() {
            bail!("No records matched the job's selector");
        }
        let image = render_chart(selection).into_bytes();

        tokio::fs::create_dir_all(&self.chart_dir).await?;
        let path = self.chart_dir.join(format!("graph_{}.svg", job.id));
        local_fs::write_atomic(&path, image.clone())
            .await
            .with_context(|| format!("Couldn't write chart '{path}'"))?;
        info!("Chart for job {} saved to '{path}'", job.id);

        let location = match &self.upload {
            Some(target) => self.upload(target, image).await?,
            None => path.into_string(),
        };
        Ok(Value::String(location))
    }
}

/// Bar chart with years on the x axis and spot counts on the y axis.
pub fn render_chart(records: &[Record]) -> String {
    let plot_width = WIDTH - 2.0 * MARGIN;
    let plot_height = HEIGHT - 2.0 * MARGIN;
    let max_spots = records.iter().map(|r| r.spots).max().unwrap_or(0).max(1);
    let slot = plot_width / records.len() as f64;
    let bar_width = (slot * 0.8).max(0.5);
    let baseline = HEIGHT - MARGIN;
    let tick_every = records.len().div_ceil(MAX_TICKS).max(1);

    let mut svg = String::with_capacity(256 + records.len() * 96);
    // Writing into a String can't fail
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}">"#
    );
    let _ = writeln!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-size="18">{TITLE}</text>"#,
        WIDTH / 2.0,
        MARGIN / 2.0
    );
    let _ = writeln!(
        svg,
        r#"<line x1="{MARGIN}" y1="{baseline}" x2="{}" y2="{baseline}" stroke="black"/>"#,
        WIDTH - MARGIN
    );
    let _ = writeln!(
        svg,
        r#"<line x1="{MARGIN}" y1="{MARGIN}" x2="{MARGIN}" y2="{baseline}" stroke="black"/>"#
    );
    for (i, record) in records.iter().enumerate() {
        let height = plot_height * f64::from(record.spots) / f64::from(max_spots);
        let x = MARGIN + slot * i as f64 + (slot - bar_width) / 2.0;
        let _ = writeln!(
            svg,
            r##"<rect class="bar" x="{x:.2}" y="{:.2}" width="{bar_width:.2}" height="{height:.2}" fill="#1f77b4"><title>{}: {}</title></rect>"##,
            baseline - height,
            record.year,
            record.spots
        );
        if i % tick_every == 0 {
            let _ = writeln!(
                svg,
                r#"<text x="{:.2}" y="{}" text-anchor="middle" font-size="11">{}</text>"#,
                x + bar_width / 2.0,
                baseline + 16.0,
                record.year
            );
        }
    }
    let _ = writeln!(
        svg,
        r#"<text x="{MARGIN}" y="{}" text-anchor="end" font-size="11">{max_spots}</text>"#,
        MARGIN + 4.0
    );
    let _ = writeln!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-size="13">Year</text>"#,
        WIDTH / 2.0,
        HEIGHT - 15.0
    );
    let _ = writeln!(
        svg,
        r#"<text x="15" y="{}" text-anchor="middle" font-size="13" transform="rotate(-90 15 {})">Number of Sunspots</text>"#,
        HEIGHT / 2.0,
        HEIGHT / 2.0
    );
    svg.push_str("</svg>\n");
    svg
}

#[cfg(test)]
mod tests {
    use axum::{http::HeaderMap, routing::post, Json};
    use serde_json::json;

    use super::*;
    use crate::types::{JobKey, Selector, WorkType};

    fn records() -> Vec<Record> {
        (0..25)
            .map(|i| Record {
                id: i,
                year: 1800 + i as u32,
                spots: (i as u32 * 7) % 90,
            })
            .collect()
    }

    fn chart_dir() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root.join("charts"))
    }

    #[test]
    fn test_render_chart() {
        let svg = render_chart(&records());
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(TITLE));
        assert_eq!(svg.matches(r#"<rect class="bar""#).count(), 25);
        assert!(svg.contains("<title>1804: 28</title>"));
    }

    #[tokio::test]
    async fn test_saves_chart_locally() {
        let (_dir, charts) = chart_dir();
        let handler = GraphHandler::new(charts.clone(), None);
        let job = Job::new(JobKey::new(), WorkType::Graph, Selector::default());

        let value = handler.handle(&job, &records()).await.unwrap();
        let expected = charts.join(format!("graph_{}.svg", job.id));
        assert_eq!(value, json!(expected.as_str()));
        assert!(std::fs::read_to_string(&expected).unwrap().contains(TITLE));

        assert!(handler.handle(&job, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_uploads_chart() {
        let app = axum::Router::new().route(
            "/image",
            post(|headers: HeaderMap, body: String| async move {
                assert_eq!(headers["authorization"], "Client-ID test");
                assert!(body.contains(TITLE));
                Json(json!({"data": {"link": "https://images.example/abc.svg"}}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let (_dir, charts) = chart_dir();
        let handler = GraphHandler::new(
            charts,
            Some(ChartUpload {
                url: format!("http://{addr}/image"),
                authorization: Some("Client-ID test".to_owned()),
            }),
        );
        let job = Job::new(JobKey::new(), WorkType::Graph, Selector::default());
        let value = handler.handle(&job, &records()).await.unwrap();
        assert_eq!(value, json!("https://images.example/abc.svg"));
    }
}
