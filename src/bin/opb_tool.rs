/// Example: opb_tool dump ./music/*.opb
/// Example: opb_tool to-xml ./music/*.opb -o unpack
/// Example: opb_tool from-xml ./unpack/*.opb.xml -o ./repack
use std::io::Write;
use std::path::PathBuf;

use clap::{command, Parser, Subcommand};
use colored::Colorize;

use opb::decoder::OpbFile;
use opb::dtype::OpbFormat;
use opb::encoder;
use opb::fileutils::{
    get_final_output_folder, get_input_output_pairs, open_file_overwrite_rw, VERSION,
};
use opb::xml::OpbDocument;

#[derive(Parser)]
#[command(version = VERSION, about = "Tools for working with OPB and OPB.XML files", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every register write in an OPB file as `time: register, data`
    Dump {
        /// Sets the path of the OPB files to be dumped
        #[arg(value_name = "INPUT")]
        input_glob: String,
    },
    /// Decode OPB files into editable XML command listings
    ToXml {
        /// Sets the path of the OPB files to be translated
        #[arg(value_name = "INPUT")]
        input_glob: String,

        /// Sets the folder to output the translated files
        #[arg(short = 'o', long, value_name = "OUTPUT")]
        output_folder: Option<PathBuf>,
    },
    /// Encode XML command listings back into OPB files
    FromXml {
        /// Sets the path of the source OPB.XML files
        #[arg(value_name = "INPUT")]
        input_glob: String,

        /// Sets the folder to output the encoded files
        #[arg(short = 'o', long, value_name = "OUTPUT")]
        output_folder: Option<PathBuf>,

        /// Writes the uncompressed raw format regardless of what the XML asks for
        #[arg(long)]
        raw: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Dump { input_glob } => {
            for entry in glob::glob(input_glob)? {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        println!("{:?}", e);
                        continue;
                    }
                };
                let mut opb = OpbFile::open_file(&path)?;
                for cmd in opb.read_to_end()? {
                    println!("{:.3}: 0x{:03X}, 0x{:02X}", cmd.time, cmd.addr, cmd.data);
                }
            }
        }
        Commands::ToXml {
            input_glob,
            output_folder,
        } => {
            let output_folder = get_final_output_folder(output_folder)?;
            let input_file_paths =
                get_input_output_pairs(input_glob, "opb", &output_folder, "opb.xml")?;

            for (input_file_path, output_file_path) in input_file_paths {
                print!("Converting {}... ", input_file_path.display());
                let mut opb = OpbFile::open_file(&input_file_path)?;
                let commands = opb.read_to_end()?;
                let document =
                    OpbDocument::new(opb.header_info().format, opb.instruments(), &commands);

                let st = quick_xml::se::to_string(&document)?;
                open_file_overwrite_rw(output_file_path)?.write_all(st.as_bytes())?;
                println!("done!");
            }

            println!("\nAll files successfully processed.");
        }
        Commands::FromXml {
            input_glob,
            output_folder,
            raw,
        } => {
            let output_folder = get_final_output_folder(output_folder)?;
            let input_file_paths = get_input_output_pairs(input_glob, "xml", &output_folder, "")?;

            for (input_file_path, output_file_path) in input_file_paths {
                print!("Converting {}... ", input_file_path.display());
                let st = std::fs::read_to_string(input_file_path)?;
                let document = quick_xml::de::from_str::<OpbDocument>(&st)?;

                let mut format = document.format;
                if *raw && format != OpbFormat::Raw {
                    println!(
                        "{}--raw flag overrides the document's {} format!",
                        "Warning: ".yellow(),
                        format
                    );
                    format = OpbFormat::Raw;
                }

                let commands = document.into_commands();
                encoder::opl_to_file(format, &commands, output_file_path)?;
                println!("done!");
            }

            println!("\nAll files successfully processed.");
        }
    }

    Ok(())
}
