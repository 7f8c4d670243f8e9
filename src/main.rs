fn main() -> anyhow::Result<()> {
    babymon_lib::run()
}
