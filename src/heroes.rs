pub type Hero = &'static str;

/// Heroes drawn from when mystery heroes is enabled.
pub const HEROES: &[Hero] = &[
    "Ana",
    "Bastion",
    "D.Va",
    "Doomfist",
    "Genji",
    "Hanzo",
    "Junkrat",
    "Lúcio",
    "McCree",
    "Mei",
    "Mercy",
    "Orisa",
    "Pharah",
    "Reaper",
    "Reinhardt",
    "Roadhog",
    "Soldier: 76",
    "Sombra",
    "Symmetra",
    "Torbjörn",
    "Tracer",
    "Widowmaker",
    "Winston",
    "Zarya",
    "Zenyatta",
];
