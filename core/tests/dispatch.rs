use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use stega::{Cli, Command, FlagValue, OptionSpec, Output, StegaError};

type Seen = Arc<Mutex<Vec<String>>>;

fn cli() -> (Cli, Output) {
    let output = Output::buffer();
    let cli = Cli::builder()
        .output(output.clone())
        .without_builtins()
        .build();
    (cli, output)
}

fn capture_flags(slot: &Arc<Mutex<Option<BTreeMap<String, FlagValue>>>>) -> Command {
    let slot = slot.clone();
    Command::new("greet")
        .description("Say hello")
        .option(OptionSpec::string("name").alias("n").required())
        .option(
            OptionSpec::boolean("verbose")
                .alias("v")
                .default_value(false),
        )
        .action(move |args| {
            let slot = slot.clone();
            async move {
                *slot.lock().unwrap() = Some(args.flags);
                Ok(())
            }
        })
}

fn stega_error(err: &anyhow::Error) -> &StegaError {
    err.downcast_ref::<StegaError>()
        .unwrap_or_else(|| panic!("not a StegaError: {err:#}"))
}

#[tokio::test]
async fn greet_receives_converted_flags() {
    let (cli, _) = cli();
    let slot = Arc::new(Mutex::new(None));
    cli.register(capture_flags(&slot));

    cli.run_command(["greet", "--name=Tester", "--verbose"])
        .await
        .unwrap();

    let flags = slot.lock().unwrap().take().unwrap();
    assert_eq!(flags["name"], FlagValue::from("Tester"));
    assert_eq!(flags["verbose"], FlagValue::Bool(true));
}

#[tokio::test]
async fn aliases_and_defaults_apply() {
    let (cli, _) = cli();
    let slot = Arc::new(Mutex::new(None));
    cli.register(capture_flags(&slot));

    cli.run_command(["greet", "-n", "Ada"]).await.unwrap();

    let flags = slot.lock().unwrap().take().unwrap();
    assert_eq!(flags["name"], FlagValue::from("Ada"));
    assert_eq!(flags["verbose"], FlagValue::Bool(false));
}

#[tokio::test]
async fn child_subcommand_receives_its_flags() {
    let (cli, _) = cli();
    let seen: Seen = Arc::default();
    let sink = seen.clone();
    cli.register(
        Command::new("parent").subcommand(
            Command::new("child")
                .option(OptionSpec::string("flag").required())
                .action(move |args| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().unwrap().push(args.command.join(" "));
                        sink.lock()
                            .unwrap()
                            .push(args.string("flag").unwrap_or_default().to_string());
                        Ok(())
                    }
                }),
        ),
    );

    cli.run_command(["parent", "child", "--flag=value"])
        .await
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), ["parent child", "value"]);
}

#[tokio::test]
async fn missing_required_flag_is_reported() {
    let (cli, output) = cli();
    let slot = Arc::new(Mutex::new(None));
    cli.register(capture_flags(&slot));

    let err = cli.run_command(["greet"]).await.unwrap_err();
    assert_eq!(*stega_error(&err), StegaError::MissingFlag("name".into()));
    assert_eq!(err.to_string(), "Missing required flag: --name");
    assert!(slot.lock().unwrap().is_none());
    assert!(output.contents().contains("Available Commands:"));
}

#[tokio::test]
async fn unknown_command_prints_help() {
    let (cli, output) = cli();
    cli.register(Command::new("known").description("A known command"));

    let err = cli.run_command(["nope"]).await.unwrap_err();
    assert_eq!(
        *stega_error(&err),
        StegaError::CommandNotFound("nope".into())
    );
    assert_eq!(err.to_string(), "Command \"nope\" not found.");
    let printed = output.contents();
    assert!(printed.contains("Available Commands:"));
    assert!(printed.contains("known"));
    assert!(printed.contains("A known command"));
}

#[tokio::test]
async fn unknown_subcommand_is_reported() {
    let (cli, _) = cli();
    cli.register(Command::new("parent").subcommand(Command::new("child")));

    let err = cli.run_command(["parent", "stranger"]).await.unwrap_err();
    assert_eq!(
        *stega_error(&err),
        StegaError::SubcommandNotFound("stranger".into())
    );
    assert_eq!(err.to_string(), "Subcommand \"stranger\" not found.");
}

#[tokio::test]
async fn invalid_number_is_a_flag_error() {
    let (cli, _) = cli();
    cli.register(
        Command::new("sleep")
            .option(OptionSpec::number("secs"))
            .action(|_| async { Ok(()) }),
    );

    let err = cli
        .run_command(["sleep", "--secs=soon"])
        .await
        .unwrap_err();
    match stega_error(&err) {
        StegaError::InvalidFlagValue { flag, reason } => {
            assert_eq!(flag, "secs");
            assert!(reason.contains("Invalid number value"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn middleware_runs_in_order_before_action() {
    let (cli, _) = cli();
    let seen: Seen = Arc::default();

    for label in ["first", "second"] {
        let sink = seen.clone();
        cli.use_middleware(move |args, cmd| {
            let sink = sink.clone();
            async move {
                sink.lock()
                    .unwrap()
                    .push(format!("{label}:{}:{}", cmd.name, args.command.join(" ")));
                Ok(())
            }
        });
    }
    let sink = seen.clone();
    cli.register(Command::new("work").action(move |_| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push("action".into());
            Ok(())
        }
    }));

    cli.run_command(["work"]).await.unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        ["first:work:work", "second:work:work", "action"]
    );
}

#[tokio::test]
async fn failing_middleware_aborts_dispatch() {
    let (cli, output) = cli();
    let ran = Arc::new(Mutex::new(false));
    cli.use_middleware(|_, _| async { anyhow::bail!("not allowed") });
    let flag = ran.clone();
    cli.register(Command::new("work").action(move |_| {
        let flag = flag.clone();
        async move {
            *flag.lock().unwrap() = true;
            Ok(())
        }
    }));

    let err = cli.run_command(["work"]).await.unwrap_err();
    assert_eq!(err.to_string(), "not allowed");
    assert!(!*ran.lock().unwrap());
    assert!(output.contents().contains("Available Commands:"));
}

#[tokio::test]
async fn action_errors_are_returned_unwrapped() {
    let (cli, _) = cli();
    cli.register(Command::new("boom").action(|_| async { anyhow::bail!("kaboom") }));

    let err = cli.run_command(["boom"]).await.unwrap_err();
    assert_eq!(err.to_string(), "kaboom");
    assert!(err.downcast_ref::<StegaError>().is_none());
}

#[tokio::test]
async fn empty_argv_and_help_print_without_failing() {
    let (cli, output) = cli();
    cli.register(
        Command::new("greet")
            .description("Say hello")
            .option(OptionSpec::string("name").alias("n").required()),
    );

    cli.run_command(Vec::<String>::new()).await.unwrap();
    assert!(output.contents().contains("Available Commands:"));

    cli.run_command(["help", "greet"]).await.unwrap();
    let printed = output.contents();
    assert!(printed.contains("Usage: stega greet"));
    assert!(printed.contains("--name, -n"));
    assert!(printed.contains("(required)"));
}

#[tokio::test]
async fn namespace_without_action_prints_its_help() {
    let (cli, output) = cli();
    cli.register(
        Command::new("remote")
            .description("Manage remotes")
            .subcommand(Command::new("add").description("Add a remote")),
    );

    cli.run_command(["remote"]).await.unwrap();
    let printed = output.contents();
    assert!(printed.contains("Subcommands:"));
    assert!(printed.contains("Add a remote"));
}

#[tokio::test]
async fn positionals_reach_the_action() {
    let (cli, _) = cli();
    let seen: Seen = Arc::default();
    let sink = seen.clone();
    cli.register(Command::new("cat").action(move |args| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().extend(args.positionals);
            Ok(())
        }
    }));

    cli.run_command(["cat", "a.txt", "-5", "--", "--literal"])
        .await
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), ["a.txt", "-5", "--literal"]);
}

#[tokio::test]
async fn later_registration_replaces_earlier() {
    let (cli, output) = cli();
    cli.register(Command::new("dup").action(|args| async move {
        args.cli.output().write_line("old");
        Ok(())
    }));
    cli.register(Command::new("dup").action(|args| async move {
        args.cli.output().write_line("new");
        Ok(())
    }));

    assert_eq!(cli.commands().len(), 1);
    cli.run_command(["dup"]).await.unwrap();
    assert_eq!(output.contents(), "new\n");
}

#[tokio::test]
async fn ready_resolves_after_mark() {
    let (cli, _) = cli();
    assert!(!cli.is_ready());

    let waiter = {
        let cli = cli.clone();
        tokio::spawn(async move { cli.ready().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!waiter.is_finished());

    cli.mark_as_ready();
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(cli.is_ready());
}

#[tokio::test]
async fn nested_failure_prints_help_once() {
    let (cli, output) = cli();
    cli.register(Command::new("wrapper").action(|args| async move {
        args.cli.run_command(["missing"]).await
    }));

    let err = cli.run_command(["wrapper"]).await.unwrap_err();
    assert_eq!(
        *stega_error(&err),
        StegaError::CommandNotFound("missing".into())
    );
    assert_eq!(output.contents().matches("Available Commands:").count(), 1);
}
