//! Post-deployment assets: CV document links and trackable QR targets.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use cvportal_shared::{PortalGenError, PortalUrls, QrAsset, Result};
use cvportal_storage::{PortalData, Storage};

/// Channels a QR asset is produced for.
pub const QR_CHANNELS: [&str; 3] = ["cv", "business-card", "email-signature"];

/// Produces trackable assets that point at a portal.
#[async_trait]
pub trait QrCodeService: Send + Sync {
    async fn generate(&self, job_id: &str, urls: &PortalUrls) -> Result<Vec<QrAsset>>;
}

/// Builds UTM-tagged links for each channel; rendering the QR image is left
/// to the consumer of [`QrAsset::tracking_url`].
#[derive(Debug, Clone)]
pub struct TrackedLinkQrService {
    channels: Vec<String>,
}

impl Default for TrackedLinkQrService {
    fn default() -> Self {
        Self {
            channels: QR_CHANNELS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl TrackedLinkQrService {
    pub fn with_channels(channels: Vec<String>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl QrCodeService for TrackedLinkQrService {
    async fn generate(&self, job_id: &str, urls: &PortalUrls) -> Result<Vec<QrAsset>> {
        let base = Url::parse(&urls.portal)
            .map_err(|e| PortalGenError::QrUpdate(format!("invalid portal URL '{}': {e}", urls.portal)))?;
        let campaign = format!("portal-{job_id}");

        Ok(self
            .channels
            .iter()
            .map(|channel| {
                let mut tracked = base.clone();
                tracked
                    .query_pairs_mut()
                    .append_pair("utm_source", "qr")
                    .append_pair("utm_medium", channel)
                    .append_pair("utm_campaign", &campaign);
                QrAsset {
                    channel: channel.clone(),
                    target_url: urls.portal.clone(),
                    tracking_url: tracked.to_string(),
                }
            })
            .collect())
    }
}

/// Write the portal links back into the stored CV document and the job's
/// portal data.
#[instrument(skip(storage, urls))]
pub async fn update_cv_document(
    storage: &Storage,
    job_id: &str,
    urls: &PortalUrls,
    status: &str,
) -> Result<()> {
    let job = storage
        .get_job(job_id)
        .await
        .map_err(|e| PortalGenError::QrUpdate(e.to_string()))?
        .ok_or_else(|| PortalGenError::QrUpdate(format!("job {job_id} no longer exists")))?;

    let mut profile = job.profile;
    let Value::Object(fields) = &mut profile else {
        return Err(PortalGenError::QrUpdate(
            "stored profile is not a JSON object".into(),
        ));
    };
    fields.insert("portalUrl".into(), Value::String(urls.portal.clone()));
    fields.insert("chatUrl".into(), Value::String(urls.chat.clone()));

    storage
        .update_job_profile(job_id, &profile)
        .await
        .map_err(|e| PortalGenError::QrUpdate(e.to_string()))?;
    storage
        .update_portal_data(
            job_id,
            &PortalData {
                urls: urls.clone(),
                status: status.to_string(),
            },
        )
        .await
        .map_err(|e| PortalGenError::QrUpdate(e.to_string()))?;

    debug!(portal = %urls.portal, "cv document updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn urls() -> PortalUrls {
        PortalUrls {
            portal: "https://john-doe-abc-cv-portal.hf.space".into(),
            chat: "https://john-doe-abc-cv-portal.hf.space/chat".into(),
            api: "https://john-doe-abc-cv-portal.hf.space/api".into(),
            deployed: false,
        }
    }

    #[tokio::test]
    async fn tracked_links_per_channel() {
        let assets = TrackedLinkQrService::default()
            .generate("job-9", &urls())
            .await
            .unwrap();
        assert_eq!(assets.len(), 3);
        assert_eq!(assets[1].channel, "business-card");
        assert_eq!(
            assets[1].tracking_url,
            "https://john-doe-abc-cv-portal.hf.space/?utm_source=qr&utm_medium=business-card&utm_campaign=portal-job-9"
        );
    }

    #[tokio::test]
    async fn malformed_portal_url_is_qr_error() {
        let mut bad = urls();
        bad.portal = "not a url".into();
        let err = TrackedLinkQrService::default().generate("j", &bad).await.unwrap_err();
        assert_eq!(err.code(), "QR_UPDATE_ERROR");
    }

    #[tokio::test]
    async fn cv_document_gets_links() {
        let path = std::env::temp_dir().join(format!("cvp_assets_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&path).await.unwrap();
        storage
            .insert_job("job-1", "user-1", &json!({"personalInfo": {"name": "John Doe"}}))
            .await
            .unwrap();

        update_cv_document(&storage, "job-1", &urls(), "generating").await.unwrap();

        let job = storage.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(job.profile["portalUrl"], "https://john-doe-abc-cv-portal.hf.space");
        assert_eq!(job.profile["personalInfo"]["name"], "John Doe");
        assert_eq!(job.portal_data.unwrap().status, "generating");

        let err = update_cv_document(&storage, "missing", &urls(), "x").await.unwrap_err();
        assert_eq!(err.code(), "QR_UPDATE_ERROR");
    }
}
