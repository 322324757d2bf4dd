use chromiumoxide::cdp::browser_protocol::fetch::{
    EnableParams, EventRequestPaused, FailRequestParams, RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, ResourceType};
use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::error::SessionResult;

/// How much of a page loads. `Full` loads everything; the leaner
/// profiles abort whole resource classes before any bytes transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PageProfile {
    #[default]
    Full,
    Clean,
    VeryClean,
}

impl PageProfile {
    pub fn blocked_resource_types(&self) -> &'static [ResourceType] {
        match self {
            PageProfile::Full => &[],
            PageProfile::Clean => &[ResourceType::Image, ResourceType::Font],
            PageProfile::VeryClean => &[
                ResourceType::Image,
                ResourceType::Font,
                ResourceType::Script,
                ResourceType::Stylesheet,
            ],
        }
    }
}

/// Registers the profile's request interception plus the dialog
/// auto-accept listener on a fresh page. Called exactly once per page;
/// the returned handles tear the listener tasks down when the page is
/// replaced or closed.
pub(crate) async fn apply_profile(
    page: &Page,
    profile: PageProfile,
) -> SessionResult<Vec<AbortHandle>> {
    let mut handles = Vec::new();
    handles.push(spawn_dialog_acceptor(page).await?);
    if let Some(handle) = spawn_resource_blocker(page, profile).await? {
        handles.push(handle);
    }
    Ok(handles)
}

/// Dialogs would otherwise park navigation forever; accept them all.
async fn spawn_dialog_acceptor(page: &Page) -> SessionResult<AbortHandle> {
    let mut dialogs = page.event_listener::<EventJavascriptDialogOpening>().await?;
    let page = page.clone();
    let task = tokio::spawn(async move {
        while let Some(event) = dialogs.next().await {
            debug!(message = %event.message, "accepting page dialog");
            let params = HandleJavaScriptDialogParams::new(true);
            if let Err(err) = page.execute(params).await {
                warn!(error = %err, "failed to accept page dialog");
            }
        }
    });
    Ok(task.abort_handle())
}

async fn spawn_resource_blocker(
    page: &Page,
    profile: PageProfile,
) -> SessionResult<Option<AbortHandle>> {
    let blocked = profile.blocked_resource_types();
    if blocked.is_empty() {
        return Ok(None);
    }
    let patterns: Vec<RequestPattern> = blocked
        .iter()
        .map(|resource_type| {
            RequestPattern::builder()
                .resource_type(resource_type.clone())
                .build()
        })
        .collect();

    // Listener before enable, otherwise early requests slip through
    // unpaused.
    let mut paused = page.event_listener::<EventRequestPaused>().await?;
    page.execute(EnableParams::builder().patterns(patterns).build())
        .await?;

    let page = page.clone();
    let task = tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let params =
                FailRequestParams::new(event.request_id.clone(), ErrorReason::BlockedByClient);
            if let Err(err) = page.execute(params).await {
                warn!(error = %err, "failed to abort intercepted request");
            }
        }
    });
    debug!(profile = ?profile, "resource interception enabled");
    Ok(Some(task.abort_handle()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_profile_blocks_nothing() {
        assert!(PageProfile::Full.blocked_resource_types().is_empty());
    }

    #[test]
    fn clean_profile_blocks_images_and_fonts() {
        let blocked = PageProfile::Clean.blocked_resource_types();
        assert_eq!(blocked.len(), 2);
        assert!(blocked.contains(&ResourceType::Image));
        assert!(blocked.contains(&ResourceType::Font));
        assert!(!blocked.contains(&ResourceType::Script));
    }

    #[test]
    fn very_clean_profile_blocks_scripts_and_styles_too() {
        let blocked = PageProfile::VeryClean.blocked_resource_types();
        assert_eq!(blocked.len(), 4);
        assert!(blocked.contains(&ResourceType::Script));
        assert!(blocked.contains(&ResourceType::Stylesheet));
    }
}
