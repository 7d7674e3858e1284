use std::{
    io::Write as _,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use retrack::{
    Anchor, CacheConfig, ExportOpts, FfmpegSinkFactory, FrameSource, Project, SaveOutcome,
    Session, StepOutcome,
};

#[derive(Parser, Debug)]
#[command(name = "retrack", version, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    cmd: Option<Command>,

    /// Meta descriptor to open for interactive retracking.
    metafile: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render the retracked output video (requires `ffmpeg` on PATH).
    Dump(DumpArgs),
}

#[derive(Parser, Debug)]
struct DumpArgs {
    /// Meta descriptor JSON.
    metafile: PathBuf,

    /// Output video path. A `%d` / `%03d` placeholder splits output into 10-minute parts.
    videodest: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match (cli.cmd, cli.metafile) {
        (Some(Command::Dump(args)), _) => cmd_dump(args, &install_interrupt_flag()),
        (None, Some(metafile)) => cmd_session(&metafile, &install_interrupt_flag()),
        (None, None) => {
            anyhow::bail!("usage: retrack <metafile> | retrack dump <metafile> <videodest>")
        }
    }
}

/// Raised by Ctrl-C. Long-running commands poll it and stop cleanly; a second Ctrl-C
/// before anything consumed the first exits at once.
fn install_interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let raised = flag.clone();
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                tracing::warn!(error = %e, "Ctrl-C handling unavailable");
                return;
            }
        };
        rt.block_on(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if raised.swap(true, Ordering::Relaxed) {
                    eprintln!("interrupted again, exiting without saving");
                    std::process::exit(130);
                }
                tracing::info!("interrupt received");
            }
        });
    });
    flag
}

fn cmd_dump(args: DumpArgs, interrupt: &Arc<AtomicBool>) -> anyhow::Result<()> {
    let project = Project::open(&args.metafile)
        .with_context(|| format!("open project '{}'", args.metafile.display()))?;
    let stats = project.export(
        &args.videodest,
        &mut FfmpegSinkFactory,
        &ExportOpts {
            cancel: Some(interrupt.clone()),
        },
    )?;
    if stats.cancelled {
        anyhow::bail!(
            "export cancelled after {} frames ({} file(s) under {})",
            stats.frames_written,
            stats.segments,
            args.videodest
        );
    }
    eprintln!(
        "wrote {} frames in {} file(s) to {}",
        stats.frames_written, stats.segments, args.videodest
    );
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
enum Cmd {
    Step(i64),
    Goto(i64),
    Set(f64, f64),
    Clear,
    Smooth(i64, i64),
    Undo,
    Play(f64, Option<u64>),
    Snap(PathBuf),
    Info,
    Save,
    Quit,
}

const HELP: &str = "\
commands:
  n [k]            step forward (default 1)
  p [k]            step back (default 1)
  g <i>            go to frame
  set <x> <y>      pin the anchor on this frame
  x                unpin this frame
  smooth <a> <b>   smooth frames a..=b
  undo             undo the last smoothing
  play <s> [n]     play at speed s for at most n frames (Ctrl-C stops)
  snap <png>       write the output view
  info             show state
  s                save
  q                quit";

fn parse_command(line: &str) -> anyhow::Result<Option<Cmd>> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    fn num<T: std::str::FromStr>(args: &[&str], i: usize, what: &str) -> anyhow::Result<T> {
        let raw = args
            .get(i)
            .with_context(|| format!("missing {what}"))?;
        raw.parse::<T>()
            .map_err(|_| anyhow::anyhow!("invalid {what} '{raw}'"))
    }
    fn opt_num<T: std::str::FromStr>(
        args: &[&str],
        i: usize,
        what: &str,
    ) -> anyhow::Result<Option<T>> {
        if args.len() > i {
            num(args, i, what).map(Some)
        } else {
            Ok(None)
        }
    }

    let cmd = match head {
        "n" => Cmd::Step(opt_num(&args, 0, "count")?.unwrap_or(1)),
        "p" => Cmd::Step(-opt_num::<i64>(&args, 0, "count")?.unwrap_or(1)),
        "g" => Cmd::Goto(num(&args, 0, "frame")?),
        "set" => Cmd::Set(num(&args, 0, "x")?, num(&args, 1, "y")?),
        "x" => Cmd::Clear,
        "smooth" => Cmd::Smooth(num(&args, 0, "start")?, num(&args, 1, "stop")?),
        "undo" => Cmd::Undo,
        "play" => Cmd::Play(num(&args, 0, "speed")?, opt_num(&args, 1, "frames")?),
        "snap" => Cmd::Snap(PathBuf::from(
            args.first().copied().context("missing png path")?,
        )),
        "info" => Cmd::Info,
        "s" => Cmd::Save,
        "q" => Cmd::Quit,
        "help" | "?" => {
            println!("{HELP}");
            return Ok(None);
        }
        other => anyhow::bail!("unknown command '{other}' (try 'help')"),
    };
    Ok(Some(cmd))
}

fn read_line() -> anyhow::Result<Option<String>> {
    let mut buf = String::new();
    let n = std::io::stdin()
        .read_line(&mut buf)
        .context("read from stdin")?;
    Ok((n > 0).then_some(buf))
}

fn ask(path: &Path) -> bool {
    print!("write {}? (y/n) ", path.display());
    let _ = std::io::stdout().flush();
    matches!(read_line(), Ok(Some(answer)) if answer.trim().to_lowercase().starts_with('y'))
}

fn cmd_session(metafile: &Path, interrupt: &AtomicBool) -> anyhow::Result<()> {
    let project = Project::open(metafile)
        .with_context(|| format!("open project '{}'", metafile.display()))?;
    let mut session = project.into_session(CacheConfig::interactive())?;
    print_status(&session);

    loop {
        print!("> ");
        std::io::stdout().flush().context("flush stdout")?;
        let Some(line) = read_line()? else {
            break;
        };
        let cmd = match parse_command(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        if cmd == Cmd::Quit {
            break;
        }
        // A Ctrl-C at the prompt only arms the flag; the next command starts clear.
        interrupt.store(false, Ordering::Relaxed);
        if let Err(e) = run_command(&mut session, cmd, interrupt) {
            eprintln!("error: {e:#}");
        }
    }

    let report = session.save(&mut ask)?;
    report_save("meta", &report.meta);
    report_save("keyframes", &report.keyframes);
    Ok(())
}

fn run_command<S: FrameSource>(
    session: &mut Session<S>,
    cmd: Cmd,
    interrupt: &AtomicBool,
) -> anyhow::Result<()> {
    match cmd {
        Cmd::Step(delta) => {
            if session.step(delta)? == StepOutcome::Stop {
                println!("stopped");
            }
            print_status(session);
        }
        Cmd::Goto(index) => {
            if !session.load_frame(index, true)? {
                println!("frame {index} unavailable");
            }
            print_status(session);
        }
        Cmd::Set(x, y) => {
            session.set_anchor(Anchor::new(x, y));
            print_status(session);
        }
        Cmd::Clear => {
            if !session.clear_current() {
                println!("frame {} is not pinned", session.index());
            }
            print_status(session);
        }
        Cmd::Smooth(a, b) => {
            if session.smooth(a, b) {
                println!("smoothed {a}..={b}");
            } else {
                println!("nothing to smooth in {a}..={b}");
            }
        }
        Cmd::Undo => {
            if session.undo() {
                println!("undone");
                print_status(session);
            } else {
                println!("nothing to be undone");
            }
        }
        Cmd::Play(speed, limit) => {
            session.play(speed, limit, interrupt)?;
            if interrupt.swap(false, Ordering::Relaxed) {
                println!("interrupted");
            }
            print_status(session);
        }
        Cmd::Snap(path) => {
            let frame = session
                .render_preview()?
                .context("current frame did not decode")?;
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create output dir '{}'", parent.display()))?;
            }
            image::save_buffer_with_format(
                &path,
                &frame.data,
                frame.width,
                frame.height,
                image::ColorType::Rgba8,
                image::ImageFormat::Png,
            )
            .with_context(|| format!("write png '{}'", path.display()))?;
            println!("wrote {}", path.display());
        }
        Cmd::Info => print_info(session),
        Cmd::Save => {
            let report = session.save(&mut |_: &Path| true)?;
            report_save("meta", &report.meta);
            report_save("keyframes", &report.keyframes);
        }
        Cmd::Quit => {}
    }
    Ok(())
}

fn print_status<S: FrameSource>(session: &Session<S>) {
    let index = session.index();
    let a = session.anchor();
    let pinned = if session.timeline().entry(index).is_some() {
        " pinned"
    } else {
        ""
    };
    println!(
        "frame {index}/{} anchor {:.3} x {:.3}{pinned}",
        session.total_frames(),
        a.x,
        a.y
    );
}

fn print_info<S: FrameSource>(session: &Session<S>) {
    print_status(session);
    let vb = session.source_viewbox();
    println!("  fps:        {:.3}", session.fps());
    println!("  keyframes:  {}", session.timeline().keyframe_count());
    println!("  undo depth: {}", session.timeline().undo_depth());
    println!("  cached:     {}", session.cache().len());
    println!(
        "  viewbox:    {:.1},{:.1} .. {:.1},{:.1}",
        vb.x0, vb.y0, vb.x1, vb.y1
    );
}

fn report_save(what: &str, outcome: &SaveOutcome) {
    match outcome {
        SaveOutcome::Unchanged => println!("{what}: unchanged"),
        SaveOutcome::Declined => println!("{what}: not written"),
        SaveOutcome::Written { backup: Some(bak) } => {
            println!("wrote {what} (previous kept as {})", bak.display())
        }
        SaveOutcome::Written { backup: None } => println!("wrote {what}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_commands() {
        assert_eq!(parse_command("n").unwrap(), Some(Cmd::Step(1)));
        assert_eq!(parse_command("p 25").unwrap(), Some(Cmd::Step(-25)));
        assert_eq!(parse_command("g 40").unwrap(), Some(Cmd::Goto(40)));
        assert_eq!(
            parse_command("set 1.5 2").unwrap(),
            Some(Cmd::Set(1.5, 2.0))
        );
        assert_eq!(
            parse_command("play -0.5").unwrap(),
            Some(Cmd::Play(-0.5, None))
        );
        assert_eq!(
            parse_command("play 2 30").unwrap(),
            Some(Cmd::Play(2.0, Some(30)))
        );
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn rejects_bad_commands() {
        assert!(parse_command("g").is_err());
        assert!(parse_command("set 1 nope").is_err());
        assert!(parse_command("fly").is_err());
    }
}
