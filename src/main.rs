use clap::{Parser, Subcommand};
use pdf_view::{EngineOptions, PDFError, PdfView, RenderRequest};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Inspect and render PDF documents.
#[derive(Parser, Debug)]
#[command(name = "pdf-view", version, about)]
struct Cli {
    /// Log engine detail (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Password for encrypted documents
    #[arg(long, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print version, page count and page sizes
    Info { file: PathBuf },

    /// Render one page to a PNG file
    Render {
        file: PathBuf,

        /// 0-based page index
        #[arg(short, long, default_value_t = 0)]
        page: usize,

        /// Device pixels per point
        #[arg(short, long, default_value_t = 1.0)]
        zoom: f64,

        /// Crop origin in device pixels
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        left: i32,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        top: i32,

        /// Output width in pixels (default: the whole zoomed page)
        #[arg(long)]
        width: Option<u32>,
        /// Output height in pixels (default: the whole zoomed page)
        #[arg(long)]
        height: Option<u32>,

        /// Extra clockwise rotation in degrees
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        rotate: i32,

        /// Disable anti-aliasing
        #[arg(long)]
        no_anti_alias: bool,

        #[arg(short, long)]
        output: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut options = EngineOptions::default();
    if let Some(password) = &cli.password {
        options = options.with_password(password.as_bytes());
    }

    let result = match cli.command {
        Command::Info { file } => info(&file, &options),
        Command::Render {
            file,
            page,
            zoom,
            left,
            top,
            width,
            height,
            rotate,
            no_anti_alias,
            output,
        } => {
            let options = options.with_anti_alias(!no_anti_alias);
            render(&file, &options, page, zoom, (left, top), (width, height), rotate, &output)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn info(file: &PathBuf, options: &EngineOptions) -> Result<(), String> {
    let view = PdfView::open_path(file, options).map_err(describe)?;
    let document = view.document().map_err(describe)?;

    println!("File:    {}", file.display());
    println!("Version: {}", document.version());
    println!("Pages:   {}", document.page_count());
    if document.xref().is_encrypted() {
        println!("Encrypted");
    }
    if document.xref().was_rebuilt() {
        println!("Cross-reference table rebuilt from a full scan");
    }
    for index in 0..document.page_count() {
        let (width, height) = view.page_size(index).map_err(describe)?;
        println!("  page {:>4}: {:.2} x {:.2} pt", index, width, height);
    }
    for diagnostic in document.diagnostics() {
        println!("Warning: {diagnostic}");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn render(
    file: &PathBuf,
    options: &EngineOptions,
    page: usize,
    zoom: f64,
    (left, top): (i32, i32),
    (width, height): (Option<u32>, Option<u32>),
    rotate: i32,
    output: &PathBuf,
) -> Result<(), String> {
    let mut view = PdfView::open_path(file, options).map_err(describe)?;

    let (page_width, page_height) = view.page_size(page).map_err(describe)?;
    let (page_width, page_height) = if rotate.rem_euclid(180) == 90 {
        (page_height, page_width)
    } else {
        (page_width, page_height)
    };
    let width = width.unwrap_or((page_width * zoom).ceil().max(1.0) as u32);
    let height = height.unwrap_or((page_height * zoom).ceil().max(1.0) as u32);

    let request = RenderRequest::new(width, height)
        .with_zoom(zoom)
        .with_origin(left, top)
        .with_rotation(rotate);
    let raster = view.render_page(page, &request).map_err(describe)?;
    view.release();

    image::save_buffer_with_format(
        output,
        &raster.to_rgba8(),
        raster.width(),
        raster.height(),
        image::ExtendedColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .map_err(|e| format!("cannot write {}: {e}", output.display()))?;

    println!("Wrote {} ({}x{})", output.display(), raster.width(), raster.height());
    Ok(())
}

fn describe(error: PDFError) -> String {
    format!("{error} (code {})", error.code().as_i32())
}
