use clap::{ArgGroup, Parser};
use splatbuf_lib::SplatBuffer;
use std::error::Error;
use std::fs;
use std::process;

#[derive(Parser, Debug)]
#[command(
    name = "Splat Container Inspector",
    version = "1.0",
    about = "Inspects and validates splat container files"
)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(&["info", "validate"])
        .multiple(false)
))]
struct Cli {
    #[arg(short = 's', long = "info", help = "Print the header and section summary.")]
    info: bool,

    #[arg(short = 'c', long = "validate", help = "Check container invariants.")]
    validate: bool,

    #[arg(
        short = 'i',
        long = "input",
        value_name = "INPUT",
        required = true,
        help = "Path to the container file."
    )]
    input: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let data = match fs::read(&cli.input) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error reading input file {}: {}", cli.input, e);
            process::exit(1);
        }
    };

    let buffer = SplatBuffer::parse(data)?;

    if cli.info {
        let header = buffer.header();
        println!("File: {}", cli.input);
        println!(
            "Version: {}.{}",
            header.version_major, header.version_minor
        );
        println!("Compression Level: {}", header.compression_level);
        println!("SH Degree: {}", header.sh_degree);
        println!(
            "Scene Center: ({}, {}, {})",
            header.scene_center[0], header.scene_center[1], header.scene_center[2]
        );
        println!(
            "Sections: {} of {}",
            header.section_count, header.max_section_count
        );
        println!(
            "Splats: {} of {}",
            header.splat_count, header.max_splat_count
        );
        println!("Bytes Per Splat: {}", buffer.layout().bytes_per_splat);

        for (i, section) in buffer
            .sections()
            .iter()
            .enumerate()
            .take(header.section_count as usize)
        {
            let h = &section.header;
            println!(
                "Section {}: {} of {} splats, {} buckets ({} full, {} partial), {} bytes",
                i,
                h.splat_count,
                h.max_splat_count,
                h.bucket_count,
                h.full_bucket_count,
                h.partially_filled_bucket_count,
                h.storage_size_bytes
            );
        }
    } else if cli.validate {
        buffer.validate()?;
        println!(
            "OK: {} sections, {} splats, all invariants hold.",
            buffer.section_count(),
            buffer.splat_count()
        );
    }

    Ok(())
}
