//! External sorting for line-oriented streams.
//!
//! Sorting happens in two stages so that memory stays bounded no matter how
//! long the input stream is: lines are buffered until a byte budget is
//! reached, each full buffer is sorted and spilled to an anonymous temporary
//! file as a run, and the runs are then merged k-way through a min-heap. An
//! input that fits within a single run never touches disk.

use std::{
    cmp::Ordering,
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Seek, SeekFrom, Write},
};

use binary_heap_plus::BinaryHeap;
use thiserror::Error;

/// Default in-memory run budget: 64 MiB of line data.
pub const DEFAULT_RUN_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Sorts newline-terminated records in ascending lexicographic byte order.
#[derive(Debug, Clone)]
pub struct Sorter {
    run_bytes: usize,
}

impl Default for Sorter {
    fn default() -> Self {
        Self::new(DEFAULT_RUN_BYTES)
    }
}

impl Sorter {
    /// Constructs a sorter that buffers at most `run_bytes` of line data in
    /// memory at a time.
    pub fn new(run_bytes: usize) -> Self {
        Self {
            // A zero budget would spill a run per line.
            run_bytes: run_bytes.max(1),
        }
    }

    /// Sorts `input` into `output`, returning the number of records written.
    pub fn sort<R, W>(&self, mut input: R, output: &mut W) -> Result<u64, Error>
    where
        R: BufRead,
        W: Write,
    {
        let mut runs: Vec<File> = Vec::new();
        let mut buffer: Vec<Vec<u8>> = Vec::new();
        let mut buffered_bytes = 0;

        loop {
            let mut line = Vec::new();
            let n = input.read_until(b'\n', &mut line)?;
            if n == 0 {
                break;
            }
            if line.last() == Some(&b'\n') {
                line.pop();
            }

            buffered_bytes += line.len();
            buffer.push(line);

            if buffered_bytes >= self.run_bytes {
                runs.push(spill_run(&mut buffer)?);
                buffered_bytes = 0;
            }
        }

        buffer.sort_unstable();

        if runs.is_empty() {
            // Everything fit in one in-memory run.
            let mut written = 0;
            for line in &buffer {
                output.write_all(line)?;
                output.write_all(b"\n")?;
                written += 1;
            }
            return Ok(written);
        }

        if !buffer.is_empty() {
            runs.push(spill_run(&mut buffer)?);
        }

        merge_runs(runs, output)
    }
}

fn spill_run(buffer: &mut Vec<Vec<u8>>) -> Result<File, Error> {
    buffer.sort_unstable();

    let mut file = tempfile::tempfile()?;
    {
        let mut writer = BufWriter::new(&mut file);
        for line in buffer.iter() {
            writer.write_all(line)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    buffer.clear();

    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}

struct RunHead {
    line: Vec<u8>,
    run: usize,
}

fn merge_runs<W: Write>(runs: Vec<File>, output: &mut W) -> Result<u64, Error> {
    let mut readers: Vec<BufReader<File>> = runs.into_iter().map(BufReader::new).collect();

    // Min-heap over the current head line of every run; the run index breaks
    // ties so equal records drain in a stable order.
    let mut heap = BinaryHeap::new_by(|a: &RunHead, b: &RunHead| {
        match b.line.cmp(&a.line) {
            Ordering::Equal => b.run.cmp(&a.run),
            other => other,
        }
    });

    for run in 0..readers.len() {
        if let Some(line) = next_line(&mut readers[run])? {
            heap.push(RunHead { line, run });
        }
    }

    let mut written = 0;
    while let Some(head) = heap.pop() {
        output.write_all(&head.line)?;
        output.write_all(b"\n")?;
        written += 1;

        if let Some(line) = next_line(&mut readers[head.run])? {
            heap.push(RunHead { line, run: head.run });
        }
    }

    Ok(written)
}

fn next_line(reader: &mut BufReader<File>) -> Result<Option<Vec<u8>>, Error> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(Some(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_in_memory() {
        assert_eq!(
            sorted_with(Sorter::default(), b"banana\napple\ncherry\n"),
            b"apple\nbanana\ncherry\n".to_vec()
        );
    }

    #[test]
    fn test_sort_spills_runs() {
        // A tiny budget forces one run per record.
        let input: Vec<u8> = (0..100u32)
            .rev()
            .flat_map(|n| format!("{:08} payload\n", n).into_bytes())
            .collect();

        let have = sorted_with(Sorter::new(4), &input);

        let want: Vec<u8> = (0..100u32)
            .flat_map(|n| format!("{:08} payload\n", n).into_bytes())
            .collect();
        assert_eq!(have, want);
    }

    #[test]
    fn test_sort_empty_input() {
        let mut output = Vec::new();
        let written = Sorter::default().sort(&b""[..], &mut output).unwrap();
        assert_eq!(written, 0);
        assert!(output.is_empty());
    }

    #[test]
    fn test_missing_final_newline() {
        assert_eq!(
            sorted_with(Sorter::default(), b"b\na"),
            b"a\nb\n".to_vec()
        );
    }

    #[test]
    fn test_duplicate_records_survive() {
        assert_eq!(
            sorted_with(Sorter::new(2), b"x\nx\nx\n"),
            b"x\nx\nx\n".to_vec()
        );
    }

    fn sorted_with(sorter: Sorter, input: &[u8]) -> Vec<u8> {
        let mut output = Vec::new();
        sorter.sort(input, &mut output).unwrap();
        output
    }
}
