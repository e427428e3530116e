//! One-line-per-page dump stream for diagnostic runs.

use std::io::Write;

use crate::storage::PageBuf;

pub(crate) fn dump_page(out: &mut dyn Write, page: &PageBuf) -> std::io::Result<()> {
    let hdr = page.header();
    writeln!(
        out,
        "addr {:>8} size {:>8} {:<18} level {:>3} entries {:>6} records {:>8} start_recno {}",
        page.addr(),
        page.size(),
        hdr.page_type().name(),
        hdr.level(),
        hdr.entries(),
        hdr.records(),
        hdr.start_recno(),
    )
}
