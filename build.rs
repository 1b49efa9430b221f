fn main() {
    println!("cargo:rerun-if-env-changed=DOM0BACKUP_VERSION");
}
