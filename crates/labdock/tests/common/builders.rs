//! Builders for submission archives.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use flate2::write::GzEncoder;
use flate2::Compression;

/// Collects files and renders them as a zip, tar.gz or rar archive.
#[derive(Default)]
pub struct ArchiveBuilder {
    files: Vec<(String, Vec<u8>)>,
    directories: Vec<String>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.files.push((path.to_string(), content.as_bytes().to_vec()));
        self
    }

    pub fn binary(mut self, path: &str, content: &[u8]) -> Self {
        self.files.push((path.to_string(), content.to_vec()));
        self
    }

    /// An explicit (possibly empty) directory entry.
    pub fn directory(mut self, path: &str) -> Self {
        self.directories.push(path.trim_end_matches('/').to_string());
        self
    }

    pub fn zip(&self) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for dir in &self.directories {
            writer.add_directory(format!("{}/", dir), options).unwrap();
        }
        for (name, content) in &self.files {
            writer.start_file(name.as_str(), options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    pub fn tar_gz(&self) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for dir in &self.directories {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{}/", dir), std::io::empty())
                .unwrap();
        }
        for (name, content) in &self.files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_slice())
                .unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    /// A RAR 4 archive with every entry stored uncompressed.
    pub fn rar(&self) -> Vec<u8> {
        let mut out = b"Rar!\x1a\x07\x00".to_vec();
        push_rar_block(&mut out, &[0x73, 0, 0, 13, 0, 0, 0, 0, 0, 0, 0]);
        for dir in &self.directories {
            push_rar_entry(&mut out, dir, &[], true);
        }
        for (name, content) in &self.files {
            push_rar_entry(&mut out, name, content, false);
        }
        out.extend_from_slice(&[0xc4, 0x3d, 0x7b, 0x00, 0x40, 0x07, 0x00]);
        out
    }
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(bytes);
    crc.sum()
}

fn push_rar_block(out: &mut Vec<u8>, body: &[u8]) {
    out.extend_from_slice(&(crc32(body) as u16).to_le_bytes());
    out.extend_from_slice(body);
}

fn push_rar_entry(out: &mut Vec<u8>, name: &str, data: &[u8], directory: bool) {
    let flags: u16 = if directory { 0x80e0 } else { 0x8000 };
    let attr: u32 = if directory { 0o40755 } else { 0o100644 };

    let mut body = vec![0x74];
    body.extend_from_slice(&flags.to_le_bytes());
    body.extend_from_slice(&((32 + name.len()) as u16).to_le_bytes());
    body.extend_from_slice(&(data.len() as u32).to_le_bytes());
    body.extend_from_slice(&(data.len() as u32).to_le_bytes());
    body.push(3); // unix host
    body.extend_from_slice(&crc32(data).to_le_bytes());
    body.extend_from_slice(&0x5a8e_6b20u32.to_le_bytes());
    body.push(20);
    body.push(0x30); // stored
    body.extend_from_slice(&(name.len() as u16).to_le_bytes());
    body.extend_from_slice(&attr.to_le_bytes());
    body.extend_from_slice(name.as_bytes());

    push_rar_block(out, &body);
    out.extend_from_slice(data);
}

/// Whether the default rar extractor can be run on this machine.
pub fn rar_tool_available() -> bool {
    std::process::Command::new("bsdtar")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

/// A plain static site.
pub fn static_site() -> ArchiveBuilder {
    ArchiveBuilder::new()
        .file("index.html", "<h1>Hello</h1>")
        .file("css/site.css", "h1 { color: teal; }")
}

/// A Node application with a database dump that manages its own database.
pub fn node_app_with_dump() -> ArchiveBuilder {
    ArchiveBuilder::new()
        .file("package.json", r#"{"name":"shop","scripts":{"start":"node server.js"}}"#)
        .file("server.js", "require('http').createServer().listen(3000);")
        .file(
            "db/schema.sql",
            "CREATE DATABASE shop;\nUSE shop;\nCREATE TABLE items (id INT PRIMARY KEY);\n",
        )
}

/// A RAR signature followed by nothing usable.
pub fn truncated_rar() -> Vec<u8> {
    let mut bytes = b"Rar!\x1a\x07\x01\x00".to_vec();
    bytes.extend_from_slice(&[0u8; 32]);
    bytes
}
