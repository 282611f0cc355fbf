//! flvcast-probe - inspect FLV files before streaming them
//!
//! Prints the file header and one line per tag, then a summary. Stops at
//! the first structural error, which is exactly where `flvcast` would stop.
//!
//! # Usage
//!
//! ```bash
//! # Header, every tag and a summary
//! flvcast-probe video.flv
//!
//! # Only the header and summary
//! flvcast-probe --summary video.flv
//!
//! # First 20 video tags
//! flvcast-probe --tag-type video --limit 20 video.flv
//! ```

use clap::{Parser, ValueEnum};
use flvcast_lib::format::flv::{FlvDemuxer, FlvTagType};
use std::process;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TagFilter {
    Audio,
    Video,
    Script,
}

impl TagFilter {
    fn matches(self, tag_type: FlvTagType) -> bool {
        matches!(
            (self, tag_type),
            (TagFilter::Audio, FlvTagType::Audio)
                | (TagFilter::Video, FlvTagType::Video)
                | (TagFilter::Script, FlvTagType::ScriptData)
        )
    }
}

#[derive(Parser, Debug)]
#[command(name = "flvcast-probe")]
#[command(about = "List the header and tags of an FLV file", long_about = None)]
#[command(version)]
struct Args {
    /// FLV file to probe
    #[arg(value_name = "FILE")]
    file: String,

    /// Only print the header and summary
    #[arg(short, long)]
    summary: bool,

    /// Only list tags of this type
    #[arg(short, long, value_enum)]
    tag_type: Option<TagFilter>,

    /// Stop listing after this many tags
    #[arg(short, long)]
    limit: Option<u64>,
}

#[derive(Debug, Default)]
struct Totals {
    audio: u64,
    video: u64,
    script: u64,
    other: u64,
    first_timestamp: Option<u32>,
    last_timestamp: u32,
    backwards: u64,
}

fn main() {
    let args = Args::parse();

    let mut demuxer = match FlvDemuxer::open_file(&args.file) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: Failed to open file '{}': {}", args.file, e);
            process::exit(1);
        }
    };

    let header = demuxer.header().clone();
    println!("File:        {}", args.file);
    println!("Version:     {}", header.version);
    println!("Video:       {}", if header.has_video { "yes" } else { "no" });
    println!("Audio:       {}", if header.has_audio { "yes" } else { "no" });
    println!("Data offset: {}", header.data_offset);
    println!();

    let mut totals = Totals::default();
    let mut listed = 0u64;
    let mut failure = None;

    loop {
        let (tag_type, timestamp, payload_size, stream_id) = match demuxer.next_tag() {
            Ok(Some(tag)) => (
                tag.tag_type(),
                tag.timestamp(),
                tag.payload_size(),
                tag.stream_id(),
            ),
            Ok(None) => break,
            Err(e) => {
                failure = Some(e);
                break;
            }
        };

        match tag_type {
            FlvTagType::Audio => totals.audio += 1,
            FlvTagType::Video => totals.video += 1,
            FlvTagType::ScriptData => totals.script += 1,
            FlvTagType::Other(_) => totals.other += 1,
        }
        if totals.first_timestamp.is_none() {
            totals.first_timestamp = Some(timestamp);
        }
        if timestamp < totals.last_timestamp {
            totals.backwards += 1;
        }
        totals.last_timestamp = timestamp;

        let wanted = args.tag_type.map_or(true, |f| f.matches(tag_type));
        let under_limit = args.limit.map_or(true, |limit| listed < limit);
        if !args.summary && wanted && under_limit {
            println!(
                "{:>8}  {:<6} {:>10} ms  {:>8} bytes  stream {}",
                demuxer.tags_read(),
                tag_type.to_string(),
                timestamp,
                payload_size,
                stream_id
            );
            listed += 1;
        }
    }

    if !args.summary {
        println!();
    }
    println!("Tags:        {}", demuxer.tags_read());
    println!(
        "  audio {}, video {}, script {}, other {}",
        totals.audio, totals.video, totals.script, totals.other
    );
    if let Some(first) = totals.first_timestamp {
        println!("Timestamps:  {} .. {} ms", first, totals.last_timestamp);
    }
    if totals.backwards > 0 {
        println!("Backwards:   {} tag(s)", totals.backwards);
    }
    println!("Bytes read:  {}", demuxer.bytes_read());

    if let Some(e) = failure {
        eprintln!(
            "Error: '{}' is damaged after {} tags: {}",
            args.file,
            demuxer.tags_read(),
            e
        );
        process::exit(1);
    }
}
