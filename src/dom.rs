//! Captured page DOM and render-ready document bundles.
//!
//! A [`PageSnapshot`] is what the page-side capture script produces: the
//! content-description tree (CDT) of the document, the URLs it references, the
//! resources it already captured in-page, and one nested snapshot per frame.
//! [`assemble_dom`] turns a snapshot into an [`RGridDom`], the bundle sent to
//! the grid, together with the flat map of every resource the bundle needs.

use crate::error::{Error, Result};
use crate::resource::graph::{ResourceMap, ResourceResolver};
use crate::resource::{FetchOptions, HashObject, RawResource, Resource};
use base64::Engine;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content type under which a DOM bundle is uploaded to the grid.
pub const CDT_CONTENT_TYPE: &str = "x-applitools-html/cdt";

/// One attribute of a CDT element node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdtAttribute {
  pub name: String,
  pub value: String,
}

/// One node of a content-description tree.
///
/// Fields the grid understands but this crate never inspects are preserved
/// verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdtNode {
  pub node_type: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub node_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub node_value: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub attributes: Vec<CdtAttribute>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub child_node_indexes: Vec<usize>,
  #[serde(flatten)]
  pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CdtNode {
  pub fn element(name: impl Into<String>, attributes: Vec<CdtAttribute>, children: Vec<usize>) -> Self {
    Self {
      node_type: 1,
      node_name: Some(name.into()),
      node_value: None,
      attributes,
      child_node_indexes: children,
      extra: serde_json::Map::new(),
    }
  }

  pub fn text(value: impl Into<String>) -> Self {
    Self {
      node_type: 3,
      node_name: None,
      node_value: Some(value.into()),
      attributes: Vec::new(),
      child_node_indexes: Vec::new(),
      extra: serde_json::Map::new(),
    }
  }
}

/// A captured page (or frame) as handed over by the page-side capture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageSnapshot {
  pub url: String,
  pub cdt: Vec<CdtNode>,
  pub resource_urls: Vec<String>,
  pub resource_contents: BTreeMap<String, RawResource>,
  pub frames: Vec<PageSnapshot>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotJson {
  url: String,
  #[serde(default)]
  cdt: Vec<CdtNode>,
  #[serde(default)]
  resource_urls: Vec<String>,
  #[serde(default)]
  blobs: Vec<BlobJson>,
  #[serde(default)]
  frames: Vec<SnapshotJson>,
}

#[derive(Deserialize)]
struct BlobJson {
  url: String,
  #[serde(rename = "type", default)]
  content_type: Option<String>,
  /// Base64-encoded content.
  #[serde(default)]
  value: String,
}

impl SnapshotJson {
  fn into_snapshot(self) -> Result<PageSnapshot> {
    let mut resource_contents = BTreeMap::new();
    for blob in self.blobs {
      let value = base64::engine::general_purpose::STANDARD
        .decode(blob.value.as_bytes())
        .map_err(|e| Error::Other(format!("Invalid blob for '{}': {e}", blob.url)))?;
      resource_contents.insert(blob.url, RawResource::new(blob.content_type, value));
    }
    let frames = self
      .frames
      .into_iter()
      .map(SnapshotJson::into_snapshot)
      .collect::<Result<Vec<_>>>()?;
    Ok(PageSnapshot {
      url: self.url,
      cdt: self.cdt,
      resource_urls: self.resource_urls,
      resource_contents,
      frames,
    })
  }
}

impl PageSnapshot {
  /// Parse the JSON emitted by the capture script (`blobs` carry base64 content).
  pub fn from_json(json: &str) -> Result<Self> {
    let raw: SnapshotJson = serde_json::from_str(json)
      .map_err(|e| Error::Other(format!("Invalid page snapshot: {e}")))?;
    raw.into_snapshot()
  }
}

/// DOM tree bound to the resources it references.
#[derive(Debug, Clone, PartialEq)]
pub struct RGridDom {
  url: String,
  cdt: Vec<CdtNode>,
  resources: ResourceMap,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DomPayload<'a> {
  resources: BTreeMap<&'a str, HashObject>,
  dom_nodes: &'a [CdtNode],
}

impl RGridDom {
  pub fn new(url: impl Into<String>, cdt: Vec<CdtNode>, resources: ResourceMap) -> Self {
    Self {
      url: url.into(),
      cdt,
      resources,
    }
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn cdt(&self) -> &[CdtNode] {
    &self.cdt
  }

  /// Direct resources of this document (frames appear as resources too).
  pub fn resources(&self) -> &ResourceMap {
    &self.resources
  }

  /// Serialized bundle: resource hashes plus DOM nodes.
  pub fn content(&self) -> Vec<u8> {
    let payload = DomPayload {
      resources: self
        .resources
        .iter()
        .map(|(url, r)| (url.as_str(), r.hash_object()))
        .collect(),
      dom_nodes: &self.cdt,
    };
    // String-keyed maps and derived impls only, so serialization cannot fail.
    serde_json::to_vec(&payload).unwrap_or_default()
  }

  /// The bundle as an uploadable resource keyed by the document URL.
  pub fn as_resource(&self) -> Resource {
    Resource::from_content(self.url.clone(), Some(CDT_CONTENT_TYPE.to_string()), self.content())
  }

  pub fn hash_object(&self) -> HashObject {
    self.as_resource().hash_object()
  }
}

/// Output of [`assemble_dom`].
#[derive(Debug, Clone)]
pub struct AssembledDom {
  pub dom: RGridDom,
  /// Every resource needed by the bundle, including nested frames' resources and bundles.
  pub all_resources: ResourceMap,
}

/// Build the render-ready bundle of a page and all of its frames.
///
/// Frames are assembled first; each frame bundle is bound into the parent's
/// resource map under the frame URL. The page's own resources override
/// same-URL resources inherited from frames.
pub fn assemble_dom<'a>(
  resolver: &'a ResourceResolver,
  snapshot: &'a PageSnapshot,
  options: &'a FetchOptions,
) -> BoxFuture<'a, AssembledDom> {
  async move {
    let frame_jobs = snapshot
      .frames
      .iter()
      .map(|frame| assemble_dom(resolver, frame, options));
    let (mut resources, frames) = futures::join!(
      resolver.resolve(
        &snapshot.resource_urls,
        snapshot.resource_contents.clone(),
        options
      ),
      join_all(frame_jobs)
    );

    let mut all_resources = ResourceMap::new();
    for (frame, assembled) in snapshot.frames.iter().zip(frames) {
      resources.insert(frame.url.clone(), assembled.dom.as_resource());
      all_resources.extend(assembled.all_resources);
    }
    all_resources.extend(resources.iter().map(|(url, r)| (url.clone(), r.clone())));

    AssembledDom {
      dom: RGridDom::new(snapshot.url.clone(), snapshot.cdt.clone(), resources),
      all_resources,
    }
  }
  .boxed()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::resource::cache::ResourceCache;
  use crate::resource::fetch::ResourceFetcher;
  use crate::resource::{HttpResponse, NetworkFetcher};
  use async_trait::async_trait;
  use std::sync::Arc;

  struct NoNetwork;

  #[async_trait]
  impl NetworkFetcher for NoNetwork {
    async fn fetch(&self, url: &str, _options: &FetchOptions) -> Result<HttpResponse> {
      Err(Error::Other(format!("unexpected fetch of {url}")))
    }
  }

  fn page(url: &str, blobs: &[(&str, &[u8])], frames: Vec<PageSnapshot>) -> PageSnapshot {
    PageSnapshot {
      url: url.to_string(),
      resource_contents: blobs
        .iter()
        .map(|(url, bytes)| {
          (
            url.to_string(),
            RawResource::new(Some("image/png".to_string()), bytes.to_vec()),
          )
        })
        .collect(),
      frames,
      ..PageSnapshot::default()
    }
  }

  #[test]
  fn snapshot_json_decodes_blobs_and_frames() {
    let json = r#"{
      "url": "https://a.test/",
      "cdt": [{"nodeType": 9, "childNodeIndexes": [1]}, {"nodeType": 1, "nodeName": "HTML", "shadowRootIndex": 4}],
      "resourceUrls": ["https://a.test/app.css"],
      "blobs": [{"url": "https://a.test/inline.png", "type": "image/png", "value": "aGVsbG8="}],
      "frames": [{"url": "https://a.test/frame.html", "cdt": [], "resourceUrls": [], "blobs": []}]
    }"#;
    let snapshot = PageSnapshot::from_json(json).unwrap();
    assert_eq!(snapshot.resource_urls, vec!["https://a.test/app.css"]);
    let blob = &snapshot.resource_contents["https://a.test/inline.png"];
    assert_eq!(blob.value, b"hello");
    assert_eq!(blob.content_type.as_deref(), Some("image/png"));
    assert_eq!(snapshot.frames.len(), 1);
    assert_eq!(snapshot.cdt[1].extra["shadowRootIndex"], serde_json::json!(4));
  }

  #[test]
  fn invalid_blob_is_rejected() {
    let json = r#"{"url": "https://a.test/", "blobs": [{"url": "x", "value": "%%%"}]}"#;
    assert!(PageSnapshot::from_json(json).is_err());
  }

  #[test]
  fn dom_content_lists_sorted_resource_hashes() {
    let mut resources = ResourceMap::new();
    let b = Resource::from_content("https://a.test/b.png", Some("image/png".into()), vec![2]);
    let a = Resource::error("https://a.test/a.png", 404);
    resources.insert(b.url().to_string(), b.clone());
    resources.insert(a.url().to_string(), a);
    let dom = RGridDom::new(
      "https://a.test/",
      vec![CdtNode::element("DIV", vec![], vec![])],
      resources,
    );
    let value: serde_json::Value = serde_json::from_slice(&dom.content()).unwrap();
    assert_eq!(
      value["resources"]["https://a.test/a.png"],
      serde_json::json!({"errorStatusCode": 404})
    );
    assert_eq!(
      value["resources"]["https://a.test/b.png"]["hash"],
      serde_json::json!(b.hash().unwrap())
    );
    assert_eq!(value["domNodes"][0]["nodeName"], serde_json::json!("DIV"));

    let as_resource = dom.as_resource();
    assert_eq!(as_resource.content_type(), Some(CDT_CONTENT_TYPE));
    assert_eq!(as_resource.url(), "https://a.test/");
  }

  #[tokio::test]
  async fn frames_are_bound_under_their_url() {
    let inner = page("https://a.test/inner.html", &[("https://a.test/f.png", &b"frame-image"[..])], vec![]);
    let frame = page(
      "https://a.test/frame.html",
      &[("https://a.test/shared.png", &b"from-frame"[..])],
      vec![inner],
    );
    let top = page(
      "https://a.test/",
      &[("https://a.test/shared.png", &b"from-page"[..])],
      vec![frame],
    );
    let resolver = ResourceResolver::new(ResourceCache::new(), ResourceFetcher::new(Arc::new(NoNetwork)));

    let assembled = assemble_dom(&resolver, &top, &FetchOptions::default()).await;

    assert_eq!(
      assembled.all_resources.keys().map(String::as_str).collect::<Vec<_>>(),
      vec![
        "https://a.test/f.png",
        "https://a.test/frame.html",
        "https://a.test/inner.html",
        "https://a.test/shared.png",
      ]
    );
    assert_eq!(
      assembled.all_resources["https://a.test/shared.png"].content(),
      Some(&b"from-page"[..])
    );

    let bound = &assembled.dom.resources()["https://a.test/frame.html"];
    assert_eq!(bound.content_type(), Some(CDT_CONTENT_TYPE));
    assert!(!assembled.dom.resources().contains_key("https://a.test/inner.html"));
    let bundle: serde_json::Value = serde_json::from_slice(bound.content().unwrap()).unwrap();
    assert!(bundle["resources"]["https://a.test/inner.html"]["hash"].is_string());
    assert!(bundle["resources"]["https://a.test/shared.png"]["hash"].is_string());
  }
}
