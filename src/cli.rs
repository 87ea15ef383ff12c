use clap::{value_parser, crate_version, Arg, ArgAction, Command, ValueHint};

const RUN_LONG_HELP: &str = "Bring up the packs named in the configuration, run the script, then commit
and save every pack.  Nothing is saved if any script line fails.
The script is read from `--script`, or from stdin if it is piped.
Each line is one command, `#` starts a comment:
  set Q*F [guarded] [tape|removable] [range=N] [read=KEY] [write=KEY] [project=P]
  cycle Q*F(N) [reserve=N] [max=N] [account=A] [reels=R1,R2,...]
  alloc Q*F(N) FIRST COUNT
  free Q*F(N) FIRST COUNT
  assign Q*F(N)
  release Q*F(N)
  queue Q*F(N) on|off
  drop Q*F(N)
  drop Q*F
  extents Q*F(N)
  catalog
  packs
  commit";
const CONFIG_LONG_HELP: &str = "JSON object with a `packs` array, each element being {\"path\": PATH, \"fixed\": BOOL}.
Optional keys are `confirm_fixed`, `hardware_bitmap`, `max_cycle_range`, and `lookup_table_size`.
Relative pack paths are taken from the directory of the configuration file.";

fn pack_arg(help: &'static str,req: bool) -> Arg {
    Arg::new("pack").short('d').long("pack").help(help)
        .value_name("PATH")
        .value_hint(ValueHint::FilePath)
        .required(req)
}

fn console_arg() -> Arg {
    Arg::new("console").long("console").help("format for console unconditionally")
        .required(false)
        .action(ArgAction::SetTrue)
        .long_help("even if the output context is a file or pipe, use colors")
}

pub fn build_cli() -> Command {
    let long_help = "mfdkit is always invoked with exactly one of several subcommands.
Set RUST_LOG environment variable to control logging level.
  levels: trace,debug,info,warn,error

Examples:
---------
prep a pack:           `mfdkit mkpack -n FIX001 -t 600 -d fix1.pack`
show the label:        `mfdkit inspect -d fix1.pack`
dump a block:          `mfdkit inspect -d fix1.pack -b 8`
run a script:          `mfdkit run -c mfd.json -s work.txt`
piped script:          `echo catalog | mfdkit run -c mfd.json`";

    let mut main_cmd = Command::new("mfdkit")
        .about("Master File Directory engine for emulated 36-bit mainframe packs.")
        .after_long_help(long_help)
        .version(crate_version!());
    main_cmd = main_cmd.subcommand(Command::new("mkpack")
        .arg(Arg::new("name").short('n').long("name").help("pack name, up to 6 characters")
            .value_name("NAME")
            .required(true))
        .arg(Arg::new("tracks").short('t').long("tracks").help("number of tracks")
            .value_name("TRACKS")
            .value_parser(value_parser!(u64).range(16..=8192))
            .required(true))
        .arg(Arg::new("prep").short('p').long("prep").help("prep factor, words per block")
            .value_name("WORDS")
            .value_parser(["28","56","112","224","448","896","1792"])
            .default_value("112"))
        .arg(Arg::new("unlabeled").long("unlabeled").help("leave block 2 blank")
            .action(ArgAction::SetTrue))
        .arg(pack_arg("path of the pack image to create",true))
        .about("write a blank, prepped pack image to the given path"));
    main_cmd = main_cmd.subcommand(Command::new("inspect")
        .arg(pack_arg("path of the pack image, if omitted read from stdin",false))
        .arg(Arg::new("block").short('b').long("block").help("dump this block rather than the label")
            .value_name("BLOCK")
            .value_parser(value_parser!(u64))
            .required(false))
        .arg(Arg::new("raw").long("raw").help("dump host bytes in hex")
            .action(ArgAction::SetTrue)
            .requires("block"))
        .arg(console_arg())
        .about("show the label and pack sector 1 of a pack image, or dump a block"));
    main_cmd = main_cmd.subcommand(Command::new("run")
        .arg(Arg::new("config").short('c').long("config").help("engine configuration")
            .long_help(CONFIG_LONG_HELP)
            .value_name("PATH")
            .value_hint(ValueHint::FilePath)
            .required(true))
        .arg(Arg::new("script").short('s').long("script").help("script of catalog operations")
            .value_name("PATH")
            .value_hint(ValueHint::FilePath)
            .required(false))
        .arg(Arg::new("answer").short('a').long("answer").help("response to operator prompts")
            .value_name("Y/N")
            .value_parser(["y","n","Y","N"])
            .default_value("y"))
        .arg(console_arg())
        .about("bring up packs and run a script of catalog operations")
        .after_long_help(RUN_LONG_HELP));
    main_cmd = main_cmd.subcommand(
        Command::new("completions")
            .arg(
                Arg::new("shell").short('s').long("shell").help("shell target").value_name("NAME")
                    .required(true)
                    .value_parser(["bash","elv","fish","ps1","zsh"])
            )
            .about("write completions script to stdout for the specified shell")
    );
    return main_cmd;
}
