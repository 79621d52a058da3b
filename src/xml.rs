//! XML bodies of the blob REST protocol.
//!
//! Request bodies (the put-block-list manifest) are rendered with
//! `quick-xml`'s writer.  Response bodies are read with its event reader
//! into a small [`XmlNode`] tree and then mapped onto model types.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

use crate::errors::{Result, StorageError};
use crate::models::{
    BlobItem, BlobProperties, BlobType, BlockListItem, BlockListMode, ContainerItem,
    ContainerProperties, ContainerPublicAccess, CopyState, CopyStatus, LeaseDuration, LeaseState,
    LeaseStatus, ListBlobItem, Metadata, PageRange, SharedAccessPermissions, SharedAccessPolicy,
};
use std::collections::BTreeMap;

// ── Writer ──────────────────────────────────────────────────────────

/// Thin wrapper over a `quick-xml` writer that maps errors into
/// [`StorageError::XmlCreation`].
pub struct XmlBuilder {
    writer: Writer<Cursor<Vec<u8>>>,
}

fn creation_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::XmlCreation {
        message: e.to_string(),
    }
}

impl XmlBuilder {
    /// Start a document with an XML declaration.
    pub fn new() -> Result<Self> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(creation_error)?;
        Ok(Self { writer })
    }

    pub fn start(&mut self, tag: &str) -> Result<&mut Self> {
        self.writer
            .write_event(Event::Start(BytesStart::new(tag)))
            .map_err(creation_error)?;
        Ok(self)
    }

    pub fn start_with_attrs(&mut self, tag: &str, attrs: &[(&str, &str)]) -> Result<&mut Self> {
        let start = BytesStart::new(tag).with_attributes(attrs.iter().copied());
        self.writer
            .write_event(Event::Start(start))
            .map_err(creation_error)?;
        Ok(self)
    }

    pub fn end(&mut self, tag: &str) -> Result<&mut Self> {
        self.writer
            .write_event(Event::End(BytesEnd::new(tag)))
            .map_err(creation_error)?;
        Ok(self)
    }

    /// Write a `<tag>text</tag>` element.
    pub fn text_element(&mut self, tag: &str, text: &str) -> Result<&mut Self> {
        self.start(tag)?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(creation_error)?;
        self.end(tag)
    }

    pub fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner().into_inner()).map_err(creation_error)
    }
}

// ── BlockList (request) ─────────────────────────────────────────────

/// Render the put-block-list body.
///
/// ```xml
/// <?xml version="1.0" encoding="utf-8"?>
/// <BlockList>
///   <Latest>MDAwMDAx</Latest>
///   <Committed>MDAwMDAy</Committed>
/// </BlockList>
/// ```
pub fn render_block_list(blocks: &[BlockListItem]) -> Result<String> {
    let mut xml = XmlBuilder::new()?;
    xml.start("BlockList")?;
    for block in blocks {
        xml.text_element(block.mode.element_name(), &block.id)?;
    }
    xml.end("BlockList")?;
    xml.finish()
}

// ── SignedIdentifiers (container ACL) ───────────────────────────────

/// Render the set-container-ACL body.  An empty map clears every stored
/// policy.
pub fn render_signed_identifiers(policies: &BTreeMap<String, SharedAccessPolicy>) -> Result<String> {
    let mut xml = XmlBuilder::new()?;
    xml.start("SignedIdentifiers")?;
    for (id, policy) in policies {
        xml.start("SignedIdentifier")?;
        xml.text_element("Id", id)?;
        xml.start("AccessPolicy")?;
        if let Some(start) = &policy.start {
            xml.text_element("Start", start)?;
        }
        if let Some(expiry) = &policy.expiry {
            xml.text_element("Expiry", expiry)?;
        }
        xml.text_element("Permission", &policy.permissions.as_service_string())?;
        xml.end("AccessPolicy")?;
        xml.end("SignedIdentifier")?;
    }
    xml.end("SignedIdentifiers")?;
    xml.finish()
}

// ── Reader ──────────────────────────────────────────────────────────

/// One element of a parsed response body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    /// First child called `name`.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children called `name`.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of the first child called `name`, if present and non-empty.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.as_str())
            .filter(|t| !t.is_empty())
    }

    fn child_u64(&self, name: &str) -> Option<u64> {
        self.child_text(name).and_then(|t| t.parse().ok())
    }
}

/// Parse `body` into its root element.
pub fn parse_document(body: &[u8]) -> Result<XmlNode> {
    let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut stack = vec![XmlNode::new(String::new())];
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.push(XmlNode::new(name));
            }
            Ok(Event::Empty(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XmlNode::new(name));
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| StorageError::parse(format!("bad XML text: {err}")))?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(StorageError::parse("unbalanced XML end tag"));
                }
                if let Some(node) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(StorageError::parse(format!("malformed XML: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    if stack.len() != 1 {
        return Err(StorageError::parse("unterminated XML element"));
    }
    stack
        .pop()
        .and_then(|doc| doc.children.into_iter().next())
        .ok_or_else(|| StorageError::parse("empty XML document"))
}

fn expect_root(root: &XmlNode, name: &str) -> Result<()> {
    if root.name == name {
        Ok(())
    } else {
        Err(StorageError::parse(format!(
            "expected <{name}> root element, found <{}>",
            root.name
        )))
    }
}

// ── Error ───────────────────────────────────────────────────────────

/// `(code, message)` from an `<Error>` body, if the body is one.
pub fn parse_error(body: &[u8]) -> Option<(String, String)> {
    let root = parse_document(body).ok()?;
    if root.name != "Error" {
        return None;
    }
    let code = root.child_text("Code")?.to_string();
    let message = root.child_text("Message").unwrap_or_default().to_string();
    Some((code, message))
}

// ── Listings ────────────────────────────────────────────────────────

fn parse_metadata(node: Option<&XmlNode>) -> Metadata {
    node.map(|m| {
        m.children
            .iter()
            .map(|c| (c.name.clone(), c.text.clone()))
            .collect()
    })
    .unwrap_or_default()
}

fn next_marker(root: &XmlNode) -> Option<String> {
    root.child_text("NextMarker").map(str::to_string)
}

/// Containers and next marker from a list-containers body.
pub fn parse_list_containers(body: &[u8]) -> Result<(Vec<ContainerItem>, Option<String>)> {
    let root = parse_document(body)?;
    expect_root(&root, "EnumerationResults")?;

    let mut items = Vec::new();
    if let Some(containers) = root.child("Containers") {
        for c in containers.children_named("Container") {
            let name = c
                .child_text("Name")
                .ok_or_else(|| StorageError::parse("container without <Name>"))?
                .to_string();
            let mut properties = ContainerProperties::default();
            if let Some(p) = c.child("Properties") {
                properties.etag = p.child_text("Etag").map(str::to_string);
                properties.last_modified = p.child_text("Last-Modified").map(str::to_string);
                properties.lease_status = LeaseStatus::parse(p.child_text("LeaseStatus").unwrap_or_default());
                properties.lease_state = LeaseState::parse(p.child_text("LeaseState").unwrap_or_default());
                properties.lease_duration =
                    LeaseDuration::parse(p.child_text("LeaseDuration").unwrap_or_default());
                properties.public_access =
                    ContainerPublicAccess::parse(p.child_text("PublicAccess").unwrap_or_default());
            }
            items.push(ContainerItem {
                name,
                properties,
                metadata: parse_metadata(c.child("Metadata")),
            });
        }
    }
    Ok((items, next_marker(&root)))
}

fn parse_blob_properties(p: &XmlNode) -> BlobProperties {
    let owned = |name: &str| p.child_text(name).map(str::to_string);
    BlobProperties {
        blob_type: BlobType::parse(p.child_text("BlobType").unwrap_or_default()),
        length: p.child_u64("Content-Length").unwrap_or(0),
        content_type: owned("Content-Type"),
        content_encoding: owned("Content-Encoding"),
        content_language: owned("Content-Language"),
        content_disposition: owned("Content-Disposition"),
        cache_control: owned("Cache-Control"),
        content_md5: owned("Content-MD5"),
        etag: owned("Etag"),
        last_modified: owned("Last-Modified"),
        lease_status: LeaseStatus::parse(p.child_text("LeaseStatus").unwrap_or_default()),
        lease_state: LeaseState::parse(p.child_text("LeaseState").unwrap_or_default()),
        lease_duration: LeaseDuration::parse(p.child_text("LeaseDuration").unwrap_or_default()),
        page_blob_sequence_number: p.child_u64("x-ms-blob-sequence-number"),
        append_blob_committed_block_count: None,
    }
}

fn parse_copy_state(p: &XmlNode) -> Option<CopyState> {
    let copy_id = p.child_text("CopyId")?.to_string();
    let mut state = CopyState {
        copy_id,
        status: CopyStatus::parse(p.child_text("CopyStatus").unwrap_or_default()),
        source: p.child_text("CopySource").map(str::to_string),
        bytes_copied: None,
        total_bytes: None,
        completion_time: p.child_text("CopyCompletionTime").map(str::to_string),
        status_description: p.child_text("CopyStatusDescription").map(str::to_string),
    };
    if let Some(progress) = p.child_text("CopyProgress") {
        state.set_progress(progress);
    }
    Some(state)
}

/// Blobs, virtual directories and next marker from a list-blobs body.
pub fn parse_list_blobs(body: &[u8]) -> Result<(Vec<ListBlobItem>, Option<String>)> {
    let root = parse_document(body)?;
    expect_root(&root, "EnumerationResults")?;

    let mut items = Vec::new();
    if let Some(blobs) = root.child("Blobs") {
        for node in &blobs.children {
            match node.name.as_str() {
                "Blob" => {
                    let name = node
                        .child_text("Name")
                        .ok_or_else(|| StorageError::parse("blob without <Name>"))?
                        .to_string();
                    let props = node.child("Properties");
                    items.push(ListBlobItem::Blob(BlobItem {
                        name,
                        snapshot: node.child_text("Snapshot").map(str::to_string),
                        properties: props.map(parse_blob_properties).unwrap_or_default(),
                        metadata: parse_metadata(node.child("Metadata")),
                        copy_state: props.and_then(parse_copy_state),
                    }));
                }
                "BlobPrefix" => {
                    if let Some(name) = node.child_text("Name") {
                        items.push(ListBlobItem::Prefix(name.to_string()));
                    }
                }
                _ => {}
            }
        }
    }
    Ok((items, next_marker(&root)))
}

// ── Block list (response) ───────────────────────────────────────────

/// Committed then uncommitted blocks from a get-block-list body.
pub fn parse_block_list(body: &[u8]) -> Result<Vec<BlockListItem>> {
    let root = parse_document(body)?;
    expect_root(&root, "BlockList")?;

    let mut items = Vec::new();
    for (section, mode) in [
        ("CommittedBlocks", BlockListMode::Committed),
        ("UncommittedBlocks", BlockListMode::Uncommitted),
    ] {
        if let Some(list) = root.child(section) {
            for block in list.children_named("Block") {
                let id = block
                    .child_text("Name")
                    .ok_or_else(|| StorageError::parse("block without <Name>"))?;
                items.push(BlockListItem {
                    id: id.to_string(),
                    mode,
                    size: block.child_u64("Size").unwrap_or(0),
                });
            }
        }
    }
    Ok(items)
}

// ── Page ranges ─────────────────────────────────────────────────────

/// Valid page ranges from a get-page-ranges body.
pub fn parse_page_ranges(body: &[u8]) -> Result<Vec<PageRange>> {
    let root = parse_document(body)?;
    expect_root(&root, "PageList")?;
    root.children_named("PageRange")
        .map(|r| {
            match (r.child_u64("Start"), r.child_u64("End")) {
                (Some(start), Some(end)) => Ok(PageRange { start, end }),
                _ => Err(StorageError::parse("page range without <Start>/<End>")),
            }
        })
        .collect()
}

/// Stored access policies from a get-container-ACL body.  An empty body
/// means no policies.
pub fn parse_signed_identifiers(body: &[u8]) -> Result<BTreeMap<String, SharedAccessPolicy>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }
    let root = parse_document(body)?;
    expect_root(&root, "SignedIdentifiers")?;
    root.children_named("SignedIdentifier")
        .map(|si| {
            let id = si
                .child_text("Id")
                .ok_or_else(|| StorageError::parse("signed identifier without <Id>"))?;
            let policy = si.child("AccessPolicy");
            let text = |name: &str| policy.and_then(|p| p.child_text(name)).map(str::to_string);
            let permission = text("Permission").unwrap_or_default();
            let permissions = SharedAccessPermissions::parse(&permission).ok_or_else(|| {
                StorageError::parse(format!("unknown access policy permission {permission:?}"))
            })?;
            Ok((
                id.to_string(),
                SharedAccessPolicy {
                    start: text("Start"),
                    expiry: text("Expiry"),
                    permissions,
                },
            ))
        })
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────────
