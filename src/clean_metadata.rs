//! The metadata cleaning pass: re-encode interned author and log text to
//! UTF-8, trying the configured encodings in order. A record that no
//! candidate encoding can decode losslessly aborts the pass.

use cvs_svn_fast_export_state::{metadata::MetadataTable, Artifact, Layout};
use encoding_rs::Encoding;

use crate::{config::Config, error::Error};

pub(crate) const NAME: &str = "clean-metadata";

pub(crate) fn run(config: &Config, layout: &Layout) -> Result<(), Error> {
    let mut table: MetadataTable = layout.read_bincode(Artifact::Metadata)?;

    let encodings = resolve_encodings(&config.encodings);
    clean(&mut table, &encodings)?;

    layout.write_bincode(NAME, Artifact::MetadataClean, &table)?;
    log::info!("cleaned {} metadata records", table.len());
    Ok(())
}

fn resolve_encodings(labels: &[String]) -> Vec<&'static Encoding> {
    let encodings: Vec<&'static Encoding> = labels
        .iter()
        .filter_map(|label| {
            let encoding = Encoding::for_label(label.as_bytes());
            if encoding.is_none() {
                log::warn!("unknown encoding label {:?}; skipping", label);
            }
            encoding
        })
        .collect();

    if encodings.is_empty() {
        log::warn!("no usable encodings configured; falling back to UTF-8");
        vec![encoding_rs::UTF_8]
    } else {
        encodings
    }
}

fn clean(table: &mut MetadataTable, encodings: &[&'static Encoding]) -> Result<(), Error> {
    let ids: Vec<_> = table.iter().map(|(id, _)| id).collect();
    for id in ids {
        let (author, log) = {
            let record = table.get(id).ok_or(Error::Encoding { id })?;
            (record.author.clone(), record.log.clone())
        };

        let author = recode(&author, encodings).ok_or(Error::Encoding { id })?;
        let log = recode(&log, encodings).ok_or(Error::Encoding { id })?;
        table.replace_text(id, author, log);
    }
    Ok(())
}

// Decoding must be lossless; the first encoding that accepts the bytes wins.
fn recode(bytes: &[u8], encodings: &[&'static Encoding]) -> Option<Vec<u8>> {
    encodings.iter().find_map(|encoding| {
        encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| text.into_owned().into_bytes())
    })
}
