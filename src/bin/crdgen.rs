use kube::CustomResourceExt;
use webconsole_operator::crd::WebConsole;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&WebConsole::crd())?);
    Ok(())
}
